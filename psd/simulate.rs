//! Seeded autoregressive test series.

use ndarray::{Array1, ArrayView1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

/// Coefficients of the AR(4) process from Percival & Walden (1993), a standard
/// benchmark with two sharp spectral peaks.
pub const AR4_COEFFICIENTS: [f64; 4] = [2.7607, -3.8106, 2.6535, -0.9238];

/// Samples discarded before the returned series so the process forgets its zero start.
const WARM_UP: usize = 200;

/// Generates `n` points of `x_t = Σ a_j x_{t-j} + ε_t` with standard normal innovations.
pub fn ar_series(coefficients: ArrayView1<f64>, n: usize, seed: u64) -> Array1<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let p = coefficients.len();
    let total = n + WARM_UP;
    let mut x = vec![0.0; total];
    for t in 0..total {
        let mut value: f64 = rng.sample(StandardNormal);
        for (j, &a) in coefficients.iter().enumerate() {
            if t > j {
                value += a * x[t - j - 1];
            }
        }
        x[t] = value;
    }
    log::debug!("Simulated AR({p}) series of length {n} (seed {seed}).");
    Array1::from_vec(x.split_off(WARM_UP))
}

/// The AR(4) benchmark series.
pub fn ar4_series(n: usize, seed: u64) -> Array1<f64> {
    ar_series(ArrayView1::from(&AR4_COEFFICIENTS), n, seed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn same_seed_same_series() {
        let a = ar4_series(128, 7);
        let b = ar4_series(128, 7);
        let c = ar4_series(128, 8);
        assert_eq!(a.len(), 128);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn zero_coefficients_give_white_noise() {
        let x = ar_series(array![0.0, 0.0].view(), 4000, 1);
        let mean = x.mean().unwrap();
        let var = x.var(0.0);
        assert!(mean.abs() < 0.1, "mean {mean}");
        assert!((var - 1.0).abs() < 0.1, "variance {var}");
    }

    #[test]
    fn ar1_has_its_stationary_variance() {
        let x = ar_series(array![0.5].view(), 20_000, 3);
        let var = x.var(0.0);
        assert!((var - 1.0 / 0.75).abs() < 0.1, "variance {var}");
    }
}
