//! Whittle likelihood, hierarchical prior and the exact conditional draws of
//! the hyperparameters.
//!
//! The prior is
//!
//! - `V | φ ~ N(0, (φP)⁻¹)` (up to the rank deficiency absorbed by the ridge in `P`)
//! - `φ | δ ~ Gamma(φα, φβ·δ)`
//! - `δ ~ Gamma(δα, δβ)`
//! - `τ ~ InvGamma(τα, τβ)`
//!
//! and all Gamma laws use the shape/rate parameterisation. `φ` and `δ` are
//! conditionally conjugate; `τ` is conjugate to the Whittle likelihood.

use crate::config::Hyperpriors;
use crate::spline_model::{ModelError, SplineMixtureModel};
use ndarray::{ArrayView1, ArrayView2, Zip};
use rand::Rng;
use rand_distr::{Distribution, Gamma};
use std::f64::consts::PI;
use std::ops::Range;
use thiserror::Error;

/// A log-density evaluated to a non-finite value.
///
/// During a Metropolis sweep this only means "reject the proposal"; when the
/// current state itself is degenerate the sampler escalates it to a fatal error.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
#[error("{quantity} is not finite: {value}")]
pub struct NumericalDegeneracy {
    pub quantity: &'static str,
    pub value: f64,
}

#[derive(Error, Debug)]
pub enum PosteriorError {
    #[error(transparent)]
    Degenerate(#[from] NumericalDegeneracy),
    #[error(transparent)]
    Model(#[from] ModelError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConditionalDrawError {
    #[error("Cannot draw {parameter} from Gamma(shape = {shape}, rate = {rate}).")]
    InvalidGamma {
        parameter: &'static str,
        shape: f64,
        rate: f64,
    },
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Current values of the smoothing precision `φ`, its prior precision `δ`, and the PSD scale `τ`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hyperparameters {
    pub phi: f64,
    pub delta: f64,
    pub tau: f64,
}

/// Periodogram bins entering the likelihood: the zero frequency is always
/// dropped, and so is the Nyquist bin when `n` is even.
pub fn retained_bins(n: usize) -> Range<usize> {
    if n % 2 == 0 {
        1..n.saturating_sub(1).max(1)
    } else {
        1..n.max(1)
    }
}

/// The quadratic form `vᵗPv`.
pub fn penalty_quadratic_form(v: ArrayView1<f64>, penalty: ArrayView2<f64>) -> f64 {
    v.dot(&penalty.dot(&v))
}

/// Whittle log-likelihood of the periodogram `data` under the PSD `τ · spline(V)`.
pub fn log_likelihood(
    v: ArrayView1<f64>,
    tau: f64,
    data: ArrayView1<f64>,
    model: &SplineMixtureModel,
) -> Result<f64, PosteriorError> {
    let n = data.len();
    let spline = model.evaluate_at(v, n)?;
    let bins = retained_bins(n);

    let mut integrand = 0.0;
    Zip::from(spline.slice(ndarray::s![bins.clone()]))
        .and(data.slice(ndarray::s![bins]))
        .for_each(|&s, &d| {
            let psd = s * tau;
            integrand += psd.ln() + d / (2.0 * PI * psd);
        });
    let lnlike = -0.5 * integrand;

    if !lnlike.is_finite() {
        return Err(NumericalDegeneracy {
            quantity: "log-likelihood",
            value: lnlike,
        }
        .into());
    }
    Ok(lnlike)
}

/// Hierarchical log-prior of `(V, φ, δ, τ)` up to an additive constant.
pub fn log_prior(
    k: usize,
    v: ArrayView1<f64>,
    hyper: &Hyperparameters,
    priors: &Hyperpriors,
    penalty: ArrayView2<f64>,
) -> f64 {
    let Hyperparameters { phi, delta, tau } = *hyper;
    let v_p_v = penalty_quadratic_form(v, penalty);
    let (ln_phi, ln_delta, ln_tau) = (phi.ln(), delta.ln(), tau.ln());

    let weights = (k as f64 - 1.0) * 0.5 * ln_phi - phi * v_p_v * 0.5;
    let phi_term =
        priors.phi_alpha * ln_delta + (priors.phi_alpha - 1.0) * ln_phi - priors.phi_beta * delta * phi;
    let delta_term = (priors.delta_alpha - 1.0) * ln_delta - priors.delta_beta * delta;
    let tau_term = -(priors.tau_alpha + 1.0) * ln_tau - priors.tau_beta / tau;

    weights + phi_term + delta_term + tau_term
}

/// Log-posterior (likelihood plus prior), failing when it is not finite.
pub fn log_posterior(
    v: ArrayView1<f64>,
    hyper: &Hyperparameters,
    priors: &Hyperpriors,
    data: ArrayView1<f64>,
    model: &SplineMixtureModel,
) -> Result<f64, PosteriorError> {
    let lnpri = log_prior(model.n_basis(), v, hyper, priors, model.penalty());
    let lnlike = log_likelihood(v, hyper.tau, data, model)?;
    let lnpost = lnpri + lnlike;
    if !lnpost.is_finite() {
        log::debug!("Non-finite log-posterior: prior {lnpri}, likelihood {lnlike}");
        return Err(NumericalDegeneracy {
            quantity: "log-posterior",
            value: lnpost,
        }
        .into());
    }
    Ok(lnpost)
}

/// Draws from `Gamma(shape, rate)`, floored at the smallest positive normal
/// value so that the draw is never exactly zero.
fn draw_gamma<R: Rng + ?Sized>(
    rng: &mut R,
    parameter: &'static str,
    shape: f64,
    rate: f64,
) -> Result<f64, ConditionalDrawError> {
    let invalid = || ConditionalDrawError::InvalidGamma {
        parameter,
        shape,
        rate,
    };
    if !(rate.is_finite() && rate > 0.0) {
        return Err(invalid());
    }
    let gamma = Gamma::new(shape, 1.0 / rate).map_err(|_| invalid())?;
    Ok(gamma.sample(rng).max(f64::MIN_POSITIVE))
}

/// `φ | V, δ ~ Gamma((k-1)/2 + φα, φβ·δ + vᵗPv/2)`.
pub fn sample_phi<R: Rng + ?Sized>(
    rng: &mut R,
    k: usize,
    v: ArrayView1<f64>,
    penalty: ArrayView2<f64>,
    delta: f64,
    priors: &Hyperpriors,
) -> Result<f64, ConditionalDrawError> {
    let shape = (k as f64 - 1.0) / 2.0 + priors.phi_alpha;
    let rate = priors.phi_beta * delta + penalty_quadratic_form(v, penalty) / 2.0;
    draw_gamma(rng, "phi", shape, rate)
}

/// `δ | φ ~ Gamma(φα + δα, φβ·φ + δβ)`.
pub fn sample_delta<R: Rng + ?Sized>(
    rng: &mut R,
    phi: f64,
    priors: &Hyperpriors,
) -> Result<f64, ConditionalDrawError> {
    let shape = priors.phi_alpha + priors.delta_alpha;
    let rate = priors.phi_beta * phi + priors.delta_beta;
    draw_gamma(rng, "delta", shape, rate)
}

/// Shape and rate of the Gamma law of `1/τ` given the spline and the periodogram.
pub fn inverse_tau_parameters(
    spline: ArrayView1<f64>,
    data: ArrayView1<f64>,
    priors: &Hyperpriors,
) -> (f64, f64) {
    let bins = retained_bins(data.len());
    let n_retained = bins.len() as f64;
    let normed_sum: f64 = data
        .slice(ndarray::s![bins.clone()])
        .iter()
        .zip(spline.slice(ndarray::s![bins]).iter())
        .map(|(&d, &s)| d / s)
        .sum();
    let shape = priors.tau_alpha + n_retained / 2.0;
    let rate = priors.tau_beta + normed_sum / (2.0 * PI) / 2.0;
    (shape, rate)
}

/// `τ = 1 / Gamma(τα + n'/2, τβ + Σ(data'/spline')/(2π)/2)` over the retained bins.
pub fn sample_tau<R: Rng + ?Sized>(
    rng: &mut R,
    v: ArrayView1<f64>,
    data: ArrayView1<f64>,
    model: &SplineMixtureModel,
    priors: &Hyperpriors,
) -> Result<f64, ConditionalDrawError> {
    let spline = model.evaluate_at(v, data.len())?;
    let (shape, rate) = inverse_tau_parameters(spline.view(), data, priors);
    Ok(1.0 / draw_gamma(rng, "tau", shape, rate)?)
}

/// Gibbs update of `(φ, δ, τ)` in that order; every draw is accepted.
pub fn sample_hyperparameters<R: Rng + ?Sized>(
    rng: &mut R,
    v: ArrayView1<f64>,
    current: &Hyperparameters,
    priors: &Hyperpriors,
    data: ArrayView1<f64>,
    model: &SplineMixtureModel,
) -> Result<Hyperparameters, ConditionalDrawError> {
    let phi = sample_phi(rng, model.n_basis(), v, model.penalty(), current.delta, priors)?;
    let delta = sample_delta(rng, phi, priors)?;
    let tau = sample_tau(rng, v, data, model, priors)?;
    Ok(Hyperparameters { phi, delta, tau })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, Array2, array};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn reference_penalty() -> Array2<f64> {
        array![
            [1e-6, 0.00, 0.0000000000, 0.0000000000],
            [0.00, 1e-6, 0.0000000000, 0.0000000000],
            [0.00, 0.00, 0.6093175700, 0.3906834292],
            [0.00, 0.00, 0.3906834292, 0.3340004330],
        ]
    }

    fn reference_v() -> Array1<f64> {
        array![-68.6346650, 4.4997348, 1.6011013, -0.1020887]
    }

    /// Two flat basis functions: the unscaled PSD is 1 everywhere for any V.
    fn flat_model(m: usize) -> SplineMixtureModel {
        SplineMixtureModel::new(Array2::ones((2, m)), array![[1.0]]).unwrap()
    }

    #[test]
    fn quadratic_form_matches_reference() {
        let q = penalty_quadratic_form(reference_v().view(), reference_penalty().view());
        assert_abs_diff_eq!(q, 1.442495205, epsilon = 1e-6);
    }

    #[test]
    fn log_prior_matches_reference() {
        let priors = Hyperpriors {
            tau_alpha: 0.001,
            tau_beta: 0.001,
            phi_alpha: 1.0,
            phi_beta: 1.0,
            delta_alpha: 1e-4,
            delta_beta: 1e-4,
        };
        let hyper = Hyperparameters {
            phi: 1.0,
            delta: 1.0,
            tau: 0.1591549431,
        };
        let value = log_prior(
            5,
            reference_v().view(),
            &hyper,
            &priors,
            reference_penalty().view(),
        );
        assert_abs_diff_eq!(value, 0.1120841558, epsilon = 1e-6);
    }

    #[test]
    fn retained_bins_drop_zero_and_nyquist() {
        assert_eq!(retained_bins(6), 1..5);
        assert_eq!(retained_bins(7), 1..7);
        assert_eq!(retained_bins(2), 1..1);
        assert_eq!(retained_bins(1), 1..1);
        assert!(retained_bins(0).is_empty());
    }

    #[test]
    fn log_likelihood_of_flat_psd() {
        // psd = τ = 1 and data = 2π gives one unit per retained bin.
        let model = flat_model(4);
        let v = array![0.3];
        for n in [6, 5] {
            let data = Array1::from_elem(n, 2.0 * PI);
            let ll = log_likelihood(v.view(), 1.0, data.view(), &model).unwrap();
            assert_abs_diff_eq!(ll, -0.5 * retained_bins(n).len() as f64, epsilon = 1e-12);
        }

        // The zero-frequency and Nyquist bins do not contribute.
        let data = array![1e6, 2.0 * PI, 2.0 * PI, 2.0 * PI, 2.0 * PI, 1e6];
        let ll = log_likelihood(v.view(), 1.0, data.view(), &model).unwrap();
        assert_abs_diff_eq!(ll, -2.0, epsilon = 1e-12);
    }

    #[test]
    fn log_likelihood_scales_with_tau() {
        let model = flat_model(3);
        let data = Array1::from_elem(5, 1.0);
        let tau: f64 = 2.5;
        let ll = log_likelihood(array![0.0].view(), tau, data.view(), &model).unwrap();
        let expected = -0.5 * 4.0 * (tau.ln() + 1.0 / (2.0 * PI * tau));
        assert_abs_diff_eq!(ll, expected, epsilon = 1e-12);
    }

    #[test]
    fn pathological_input_reports_degeneracy() {
        let model = flat_model(4);
        let data = Array1::from_elem(6, 1.0);

        match log_likelihood(array![f64::NAN].view(), 1.0, data.view(), &model) {
            Err(PosteriorError::Degenerate(d)) => assert_eq!(d.quantity, "log-likelihood"),
            other => panic!("Expected degeneracy, got {other:?}"),
        }
        assert!(matches!(
            log_likelihood(array![0.0].view(), 0.0, data.view(), &model),
            Err(PosteriorError::Degenerate(_))
        ));
        assert!(matches!(
            log_likelihood(array![0.0, 1.0].view(), 1.0, data.view(), &model),
            Err(PosteriorError::Model(ModelError::DimensionMismatch { .. }))
        ));
    }

    #[test]
    fn log_posterior_is_prior_plus_likelihood() {
        let model = flat_model(4);
        let data = Array1::from_elem(7, 0.8);
        let v = array![-0.4];
        let hyper = Hyperparameters {
            phi: 2.0,
            delta: 0.5,
            tau: 1.3,
        };
        let priors = Hyperpriors::default();
        let post = log_posterior(v.view(), &hyper, &priors, data.view(), &model).unwrap();
        let expected = log_prior(2, v.view(), &hyper, &priors, model.penalty())
            + log_likelihood(v.view(), hyper.tau, data.view(), &model).unwrap();
        assert_abs_diff_eq!(post, expected, epsilon = 1e-12);

        let degenerate = Hyperparameters { tau: -1.0, ..hyper };
        assert!(log_posterior(v.view(), &degenerate, &priors, data.view(), &model).is_err());
    }

    fn empirical_mean(draws: impl Iterator<Item = f64>) -> f64 {
        let draws: Vec<f64> = draws.collect();
        draws.iter().sum::<f64>() / draws.len() as f64
    }

    #[test]
    fn conditional_draws_follow_their_gamma_laws() {
        let mut rng = StdRng::seed_from_u64(0x5EED);
        let priors = Hyperpriors {
            phi_alpha: 2.0,
            phi_beta: 1.5,
            delta_alpha: 3.0,
            delta_beta: 0.5,
            ..Hyperpriors::default()
        };
        let penalty = Array2::<f64>::eye(3);
        let v = array![1.0, -1.0, 2.0];
        let draws = 40_000;

        // shape = 3/2 + 2, rate = 1.5 * 0.8 + 6/2
        let phi_mean =
            empirical_mean((0..draws).map(|_| {
                sample_phi(&mut rng, 4, v.view(), penalty.view(), 0.8, &priors).unwrap()
            }));
        assert_abs_diff_eq!(phi_mean, 3.5 / 4.2, epsilon = 0.02);

        // shape = 2 + 3, rate = 1.5 * 2 + 0.5
        let delta_mean =
            empirical_mean((0..draws).map(|_| sample_delta(&mut rng, 2.0, &priors).unwrap()));
        assert_abs_diff_eq!(delta_mean, 5.0 / 3.5, epsilon = 0.03);
    }

    #[test]
    fn tau_draw_tracks_the_periodogram_level() {
        // With a flat unit spline, 1/τ ~ Gamma(τα + n'/2, τβ + Σ data'/(4π)).
        let mut rng = StdRng::seed_from_u64(11);
        let model = flat_model(50);
        let level = 3.0;
        let data = Array1::from_elem(99, 2.0 * PI * level);
        let priors = Hyperpriors::default();

        let (shape, rate) = inverse_tau_parameters(Array1::ones(99).view(), data.view(), &priors);
        assert_abs_diff_eq!(shape, 0.001 + 49.0, epsilon = 1e-12);
        assert_abs_diff_eq!(rate, 0.001 + 98.0 * level / 2.0, epsilon = 1e-9);

        let mean_tau = empirical_mean(
            (0..20_000)
                .map(|_| sample_tau(&mut rng, array![0.0].view(), data.view(), &model, &priors).unwrap()),
        );
        // E[τ] = rate / (shape - 1) for the inverse Gamma.
        assert_abs_diff_eq!(mean_tau, rate / (shape - 1.0), epsilon = 0.05);
    }

    #[test]
    fn hyperparameter_draws_stay_positive() {
        let mut rng = StdRng::seed_from_u64(3);
        let model = flat_model(10);
        let data = Array1::from_elem(19, 0.5);
        let priors = Hyperpriors::default();
        let mut hyper = Hyperparameters {
            phi: 1.0,
            delta: 1.0,
            tau: 1.0,
        };
        for _ in 0..500 {
            hyper =
                sample_hyperparameters(&mut rng, array![0.2].view(), &hyper, &priors, data.view(), &model)
                    .unwrap();
            assert!(hyper.phi > 0.0 && hyper.delta > 0.0 && hyper.tau > 0.0);
            assert!(hyper.tau.is_finite());
        }
    }

    #[test]
    fn invalid_gamma_parameters_are_reported() {
        let mut rng = StdRng::seed_from_u64(1);
        let priors = Hyperpriors {
            phi_beta: -1.0,
            ..Hyperpriors::default()
        };
        match sample_delta(&mut rng, 1.0, &priors).unwrap_err() {
            ConditionalDrawError::InvalidGamma { parameter, .. } => assert_eq!(parameter, "delta"),
            other => panic!("Expected InvalidGamma error, got {other:?}"),
        }
    }
}
