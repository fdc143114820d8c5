//! End-to-end fit: raw series in, posterior PSD band out.

use crate::basis::{self, BasisError};
use crate::config::{ConfigError, RunConfig};
use crate::fourier;
use crate::sampler::{AdaptiveSampler, Chain, InitialState, MIN_SERIES_LEN, SamplerError};
use crate::spline_model::{ModelError, SplineMixtureModel};
use crate::summary::{self, PsdSummary, SummaryError};
use ndarray::ArrayView1;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("The series has {0} points, but at least {MIN_SERIES_LEN} are required.")]
    SeriesTooShort(usize),
    #[error("The series contains a non-finite value at index {0}.")]
    NonFiniteValue(usize),
    #[error("The series is constant (variance {0}); it has no spectrum to estimate.")]
    ZeroVariance(f64),
    #[error(transparent)]
    Basis(#[from] BasisError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Sampler(#[from] SamplerError),
    #[error(transparent)]
    Summary(#[from] SummaryError),
}

/// Everything a fit produces.
#[derive(Debug)]
pub struct PsdFit {
    pub chain: Chain,
    pub summary: PsdSummary,
    pub model: SplineMixtureModel,
    /// Standard deviation the series was divided by before fitting.
    pub scale: f64,
}

/// Fits the P-spline mixture PSD to `series`.
///
/// The series is standardised before the periodogram is taken; the returned
/// summary is in the original units. The chain itself refers to the
/// standardised series.
pub fn fit(series: ArrayView1<f64>, config: &RunConfig) -> Result<PsdFit, PipelineError> {
    config.validate()?;
    if series.len() < MIN_SERIES_LEN {
        return Err(PipelineError::SeriesTooShort(series.len()));
    }
    if let Some(i) = series.iter().position(|x| !x.is_finite()) {
        return Err(PipelineError::NonFiniteValue(i));
    }

    let variance = fourier::variance(series);
    if !(variance > 0.0) {
        return Err(PipelineError::ZeroVariance(variance));
    }

    let standardized = fourier::standardize(series);
    let pdgrm = fourier::periodogram(standardized.series.view());
    log::info!(
        "Fitting a {}-component P-spline PSD to {} points (mean {:.4}, sd {:.4}).",
        config.spline.k,
        series.len(),
        standardized.mean,
        standardized.scale
    );

    let basis = basis::basis_for_series(pdgrm.view(), &config.spline)?;
    let model = SplineMixtureModel::new(basis.densities, basis.penalty)?;
    let v0 = basis::initial_coefficients(pdgrm.view(), config.spline.k);
    let initial = InitialState::from_priors(
        v0,
        fourier::variance(standardized.series.view()),
        &config.sampler.hyperpriors,
    );

    let mut sampler = AdaptiveSampler::new(model, pdgrm, &config.sampler)?;
    sampler.initialize(initial)?;
    sampler.run()?;
    let (chain, model) = sampler.into_parts();

    let burnin = config.sampler.burnin;
    let summary = summary::summarize(&chain, &model, burnin, standardized.scale)?;
    log::info!(
        "Kept {} draws after burn-in; mean acceptance {:.3}.",
        chain.len() - burnin,
        summary.mean_accept_frac
    );

    Ok(PsdFit {
        chain,
        summary,
        model,
        scale: standardized.scale,
    })
}
