//! Posterior summaries of the PSD drawn from a finished chain.

use crate::sampler::Chain;
use crate::spline_model::{ModelError, SplineMixtureModel};
use ndarray::{Array1, Array2, Axis};
use thiserror::Error;

/// Default credible band: the 5% and 95% quantiles around the median.
pub const DEFAULT_QUANTILES: (f64, f64, f64) = (0.05, 0.50, 0.95);

#[derive(Error, Debug)]
pub enum SummaryError {
    #[error("Burn-in ({burnin}) leaves no draws from a chain of length {len}.")]
    NoDrawsAfterBurnin { burnin: usize, len: usize },

    #[error("Quantile level {0} is outside [0, 1].")]
    InvalidQuantile(f64),

    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Pointwise posterior band of the PSD on the frequency grid.
#[derive(Debug, Clone)]
pub struct PsdSummary {
    /// Frequencies in units of the Nyquist frequency.
    pub frequencies: Array1<f64>,
    pub lower: Array1<f64>,
    pub median: Array1<f64>,
    pub upper: Array1<f64>,
    /// Mean Metropolis acceptance fraction over the kept draws.
    pub mean_accept_frac: f64,
}

/// PSD draws `τ · s(V) · scale²` on the model's grid, one row per kept iteration.
pub fn psd_draws(
    chain: &Chain,
    model: &SplineMixtureModel,
    burnin: usize,
    scale: f64,
) -> Result<Array2<f64>, SummaryError> {
    if burnin >= chain.len() {
        return Err(SummaryError::NoDrawsAfterBurnin {
            burnin,
            len: chain.len(),
        });
    }

    let factor = scale * scale;
    let coefficients = chain.v();
    let tau = chain.tau();
    let mut draws = Array2::zeros((chain.len() - burnin, model.grid_len()));
    for (row, i) in (burnin..chain.len()).enumerate() {
        let psd = model.evaluate(coefficients.row(i))?;
        draws.row_mut(row).assign(&(psd * (tau[i] * factor)));
    }
    Ok(draws)
}

/// Summarises the chain with the default 5%/50%/95% band.
pub fn summarize(
    chain: &Chain,
    model: &SplineMixtureModel,
    burnin: usize,
    scale: f64,
) -> Result<PsdSummary, SummaryError> {
    summarize_with_levels(chain, model, burnin, scale, DEFAULT_QUANTILES)
}

pub fn summarize_with_levels(
    chain: &Chain,
    model: &SplineMixtureModel,
    burnin: usize,
    scale: f64,
    levels: (f64, f64, f64),
) -> Result<PsdSummary, SummaryError> {
    for level in [levels.0, levels.1, levels.2] {
        if !(0.0..=1.0).contains(&level) {
            return Err(SummaryError::InvalidQuantile(level));
        }
    }

    let draws = psd_draws(chain, model, burnin, scale)?;
    let m = draws.ncols();
    let mut lower = Array1::zeros(m);
    let mut median = Array1::zeros(m);
    let mut upper = Array1::zeros(m);
    for (j, column) in draws.axis_iter(Axis(1)).enumerate() {
        let mut sorted = column.to_vec();
        sorted.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        lower[j] = quantile_sorted(&sorted, levels.0);
        median[j] = quantile_sorted(&sorted, levels.1);
        upper[j] = quantile_sorted(&sorted, levels.2);
    }

    let accept = chain.accept_frac();
    let kept = accept.slice(ndarray::s![burnin..]);
    let mean_accept_frac = kept.mean().unwrap_or(f64::NAN);

    Ok(PsdSummary {
        frequencies: Array1::linspace(0.0, 1.0, m),
        lower,
        median,
        upper,
        mean_accept_frac,
    })
}

/// Linear-interpolation (type 7) quantile of an ascending sample; NaN when empty.
fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    let float_idx = (n as f64 - 1.0) * p;
    let lower_idx = float_idx.floor() as usize;
    let upper_idx = float_idx.ceil() as usize;
    if lower_idx == upper_idx {
        sorted[lower_idx]
    } else {
        let fraction = float_idx - lower_idx as f64;
        sorted[lower_idx] * (1.0 - fraction) + sorted[upper_idx] * fraction
    }
}
