//! Fourier preprocessing of the raw series.
//!
//! The periodogram produced here has the same length `n` as the series: the
//! real Fourier coefficients are laid out as `[c0, c1, s1, c2, s2, ...]`, with a
//! trailing Nyquist cosine term when `n` is even. Every interior frequency
//! occupies two consecutive bins.
//!
//! [`crate::spline_model::resample`] stretches the `n / 2 + 1` point frequency
//! grid onto these `n` bins. For odd `n` each grid point lands exactly on its
//! cosine/sine pair. For even `n` the mapping runs half a bin ahead: with
//! `n = 8` the bins take grid points `[0, 1, 2, 2, 3, 3, 4, 4]` rather than the
//! layout's `[0, 1, 1, 2, 2, 3, 3, 4]`.

use ndarray::{Array1, ArrayView1};
use rustfft::{FftPlanner, num_complex::Complex};
use std::f64::consts::SQRT_2;

/// A centred and unit-variance copy of a series together with the affine map
/// needed to put spectral estimates back into the original units.
#[derive(Debug, Clone)]
pub struct Standardized {
    pub series: Array1<f64>,
    pub mean: f64,
    /// Population standard deviation of the original series; PSD values scale by `scale²`.
    pub scale: f64,
}

/// Removes the mean and divides by the standard deviation.
///
/// A constant series keeps `scale = 1` so the result stays finite.
pub fn standardize(series: ArrayView1<f64>) -> Standardized {
    let mean = series.mean().unwrap_or(0.0);
    let std = series.std(0.0);
    let scale = if std.is_finite() && std > 0.0 { std } else { 1.0 };
    let standardized = series.mapv(|x| (x - mean) / scale);
    Standardized {
        series: standardized,
        mean,
        scale,
    }
}

/// Population variance, used to seed the overall PSD scale `τ`.
pub fn variance(series: ArrayView1<f64>) -> f64 {
    series.var(0.0)
}

/// Computes the real-valued, orthonormally scaled Fourier coefficients of `series`.
pub fn real_fourier_coefficients(series: ArrayView1<f64>) -> Array1<f64> {
    let n = series.len();
    if n == 0 {
        return Array1::zeros(0);
    }

    let mut buffer: Vec<Complex<f64>> = series.iter().map(|&x| Complex::new(x, 0.0)).collect();
    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(n);
    fft.process(&mut buffer);

    let sqrt_n = (n as f64).sqrt();
    let mut coefficients = Array1::zeros(n);
    coefficients[0] = buffer[0].re / sqrt_n;

    let num_pairs = if n % 2 == 0 {
        coefficients[n - 1] = buffer[n / 2].re / sqrt_n;
        (n - 2) / 2
    } else {
        (n - 1) / 2
    };

    for j in 1..=num_pairs {
        coefficients[2 * j - 1] = SQRT_2 * buffer[j].re / sqrt_n;
        coefficients[2 * j] = SQRT_2 * buffer[j].im / sqrt_n;
    }
    coefficients
}

/// The squared real Fourier coefficients. Sums to `Σ x²` (Parseval).
pub fn periodogram(series: ArrayView1<f64>) -> Array1<f64> {
    real_fourier_coefficients(series).mapv(|c| c * c)
}

/// Number of distinct Fourier frequencies of a length-`n` series, zero and Nyquist included.
pub fn num_frequencies(n: usize) -> usize {
    n / 2 + 1
}

/// Uniform frequency grid on `[0, 1]`, in units of the Nyquist frequency.
pub fn frequency_grid(n: usize) -> Array1<f64> {
    Array1::linspace(0.0, 1.0, num_frequencies(n))
}
