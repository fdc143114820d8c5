//! Adaptive Metropolis-within-Gibbs sampler for the spline mixture PSD.
//!
//! # Design
//!
//! Each recorded iteration performs `thin` repetitions of
//!
//! 1. a proportional step-size update driven by the previous sweep's acceptance fraction,
//! 2. a random-scan sweep of single-coordinate Metropolis updates over `V`,
//! 3. exact conditional draws of `φ`, `δ` and `τ`.
//!
//! The chain is strictly sequential: every coordinate update sees the
//! coordinates accepted before it in the same sweep. The sampler owns its
//! random generator, so independent samplers never share generator state.
//!
//! A proposal whose log-posterior is not finite is rejected and the chain
//! carries on. A non-finite log-posterior of the *current* state (at
//! initialisation, or after a Gibbs draw) is a fatal misconfiguration.

use crate::bayes::{
    self, ConditionalDrawError, Hyperparameters, NumericalDegeneracy, PosteriorError,
};
use crate::basis::BasisError;
use crate::config::{ConfigError, Hyperpriors, SamplerConfig};
use crate::spline_model::{ModelError, SplineMixtureModel};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, s};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::{Open01, StandardNormal};
use std::f64::consts::PI;
use std::io::IsTerminal;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Shortest series the Whittle likelihood can use: at least one bin must
/// survive dropping the zero and Nyquist frequencies.
pub const MIN_SERIES_LEN: usize = 3;

const TARGET_ACCEPT_LOW: f64 = 0.30;
const TARGET_ACCEPT_HIGH: f64 = 0.50;
const SIGMA_SHRINK: f64 = 0.90;
const SIGMA_GROW: f64 = 1.10;

#[derive(Error, Debug)]
pub enum SamplerError {
    #[error("Invalid sampler configuration: {0}")]
    InvalidConfiguration(#[from] ConfigError),

    #[error("Dimension mismatch for {what}: expected {expected}, found {found}.")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("The series has {0} points, but at least {MIN_SERIES_LEN} are required.")]
    SeriesTooShort(usize),

    #[error("The current state is numerically degenerate: {0}")]
    NumericalDegeneracy(#[from] NumericalDegeneracy),

    #[error("Spline model error: {0}")]
    Model(#[from] ModelError),

    #[error("Basis construction failed: {0}")]
    Basis(#[from] BasisError),

    #[error("Gibbs update failed: {0}")]
    ConditionalDraw(#[from] ConditionalDrawError),

    #[error("The sampler must be initialised before it can step.")]
    NotInitialized,

    #[error("The sampler has already been initialised.")]
    AlreadyInitialized,
}

impl From<PosteriorError> for SamplerError {
    fn from(err: PosteriorError) -> Self {
        match err {
            PosteriorError::Degenerate(d) => SamplerError::NumericalDegeneracy(d),
            PosteriorError::Model(m) => SamplerError::Model(m),
        }
    }
}

/// Scale of the Gaussian random-walk proposal and the acceptance fraction of the last sweep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProposalState {
    pub sigma: f64,
    pub accept_frac: f64,
}

impl Default for ProposalState {
    fn default() -> Self {
        Self {
            sigma: 1.0,
            accept_frac: 0.4,
        }
    }
}

impl ProposalState {
    /// Shrinks `sigma` by 10% below 30% acceptance and grows it by 10% above 50%.
    ///
    /// `sigma` is kept within `[f64::MIN_POSITIVE, f64::MAX]`, so it stays
    /// strictly positive and finite however long the rule is applied.
    pub fn adapt(&mut self) {
        if self.accept_frac < TARGET_ACCEPT_LOW {
            self.sigma *= SIGMA_SHRINK;
        } else if self.accept_frac > TARGET_ACCEPT_HIGH {
            self.sigma *= SIGMA_GROW;
        }
        self.sigma = self.sigma.clamp(f64::MIN_POSITIVE, f64::MAX);
    }
}

/// Where the sampler is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    Uninitialized,
    Initialized,
    Running,
    Done,
}

/// Starting point of a chain.
#[derive(Debug, Clone)]
pub struct InitialState {
    pub v: Array1<f64>,
    pub hyper: Hyperparameters,
    pub proposal: ProposalState,
}

impl InitialState {
    /// `τ` from the series variance, `δ` and `φ` from their prior means, the
    /// default proposal state, and the supplied coefficient vector.
    pub fn from_priors(v: Array1<f64>, series_variance: f64, priors: &Hyperpriors) -> Self {
        let delta = priors.delta_alpha / priors.delta_beta;
        let phi = priors.phi_alpha / (priors.phi_beta * delta);
        let tau = series_variance / (2.0 * PI);
        Self {
            v,
            hyper: Hyperparameters { phi, delta, tau },
            proposal: ProposalState::default(),
        }
    }
}

/// A cloneable handle that asks a running sampler to stop after its current iteration.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// One iteration's snapshot of the chain.
#[derive(Debug, Clone, Copy)]
pub struct ChainRecord<'a> {
    pub v: ArrayView1<'a, f64>,
    pub hyper: Hyperparameters,
    pub proposal: ProposalState,
    pub log_posterior: f64,
}

/// Per-iteration traces, stored column-wise with a fixed capacity.
///
/// Only the first [`Chain::len`] iterations are filled; the accessors expose
/// exactly those.
#[derive(Debug, Clone)]
pub struct Chain {
    v: Array2<f64>,
    phi: Array1<f64>,
    delta: Array1<f64>,
    tau: Array1<f64>,
    sigma: Array1<f64>,
    accept_frac: Array1<f64>,
    log_posterior: Array1<f64>,
    len: usize,
}

impl Chain {
    pub fn with_capacity(capacity: usize, n_coefficients: usize) -> Self {
        Self {
            v: Array2::zeros((capacity, n_coefficients)),
            phi: Array1::zeros(capacity),
            delta: Array1::zeros(capacity),
            tau: Array1::zeros(capacity),
            sigma: Array1::zeros(capacity),
            accept_frac: Array1::zeros(capacity),
            log_posterior: Array1::zeros(capacity),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.phi.len()
    }

    pub fn n_coefficients(&self) -> usize {
        self.v.ncols()
    }

    fn push(&mut self, record: ChainRecord<'_>) {
        let i = self.len;
        debug_assert!(i < self.capacity(), "chain capacity exceeded");
        self.v.row_mut(i).assign(&record.v);
        self.phi[i] = record.hyper.phi;
        self.delta[i] = record.hyper.delta;
        self.tau[i] = record.hyper.tau;
        self.sigma[i] = record.proposal.sigma;
        self.accept_frac[i] = record.proposal.accept_frac;
        self.log_posterior[i] = record.log_posterior;
        self.len += 1;
    }

    /// Coefficient vectors, one row per iteration.
    pub fn v(&self) -> ArrayView2<'_, f64> {
        self.v.slice(s![..self.len, ..])
    }

    pub fn phi(&self) -> ArrayView1<'_, f64> {
        self.phi.slice(s![..self.len])
    }

    pub fn delta(&self) -> ArrayView1<'_, f64> {
        self.delta.slice(s![..self.len])
    }

    pub fn tau(&self) -> ArrayView1<'_, f64> {
        self.tau.slice(s![..self.len])
    }

    pub fn sigma(&self) -> ArrayView1<'_, f64> {
        self.sigma.slice(s![..self.len])
    }

    pub fn accept_frac(&self) -> ArrayView1<'_, f64> {
        self.accept_frac.slice(s![..self.len])
    }

    pub fn log_posterior(&self) -> ArrayView1<'_, f64> {
        self.log_posterior.slice(s![..self.len])
    }

    pub fn record(&self, i: usize) -> Option<ChainRecord<'_>> {
        (i < self.len).then(|| ChainRecord {
            v: self.v.row(i),
            hyper: Hyperparameters {
                phi: self.phi[i],
                delta: self.delta[i],
                tau: self.tau[i],
            },
            proposal: ProposalState {
                sigma: self.sigma[i],
                accept_frac: self.accept_frac[i],
            },
            log_posterior: self.log_posterior[i],
        })
    }

    /// Drops the unfilled trailing slots so that `capacity() == len()`.
    pub fn trimmed(self) -> Self {
        if self.len == self.capacity() {
            return self;
        }
        Self {
            v: self.v().to_owned(),
            phi: self.phi().to_owned(),
            delta: self.delta().to_owned(),
            tau: self.tau().to_owned(),
            sigma: self.sigma().to_owned(),
            accept_frac: self.accept_frac().to_owned(),
            log_posterior: self.log_posterior().to_owned(),
            len: self.len,
        }
    }
}

/// The adaptive MCMC chain over `(V, φ, δ, τ)`.
pub struct AdaptiveSampler<R: Rng = StdRng> {
    model: SplineMixtureModel,
    /// Periodogram the Whittle likelihood is evaluated against.
    data: Array1<f64>,
    priors: Hyperpriors,
    n_steps: usize,
    thin: usize,
    show_progress: bool,
    rng: R,
    state: SamplerState,
    chain: Chain,
    current: Array1<f64>,
    proposal: Array1<f64>,
    hyper: Hyperparameters,
    tuning: ProposalState,
    current_log_posterior: f64,
    scan_order: Vec<usize>,
    stop: StopHandle,
}

impl AdaptiveSampler<StdRng> {
    /// Creates a sampler whose generator is seeded from `config.seed`.
    pub fn new(
        model: SplineMixtureModel,
        data: Array1<f64>,
        config: &SamplerConfig,
    ) -> Result<Self, SamplerError> {
        let rng = StdRng::seed_from_u64(config.seed);
        Self::with_rng(model, data, config, rng)
    }
}

impl<R: Rng> AdaptiveSampler<R> {
    /// Creates a sampler driven by an explicitly supplied generator.
    pub fn with_rng(
        model: SplineMixtureModel,
        data: Array1<f64>,
        config: &SamplerConfig,
        rng: R,
    ) -> Result<Self, SamplerError> {
        config.validate()?;
        if data.len() < MIN_SERIES_LEN {
            return Err(SamplerError::SeriesTooShort(data.len()));
        }

        let n_coefficients = model.n_coefficients();
        Ok(Self {
            data,
            priors: config.hyperpriors,
            n_steps: config.n_steps,
            thin: config.thin,
            show_progress: config.show_progress,
            rng,
            state: SamplerState::Uninitialized,
            chain: Chain::with_capacity(config.n_steps, n_coefficients),
            current: Array1::zeros(n_coefficients),
            proposal: Array1::zeros(n_coefficients),
            hyper: Hyperparameters {
                phi: 1.0,
                delta: 1.0,
                tau: 1.0,
            },
            tuning: ProposalState::default(),
            current_log_posterior: f64::NEG_INFINITY,
            scan_order: (0..n_coefficients).collect(),
            stop: StopHandle::default(),
            model,
        })
    }

    pub fn state(&self) -> SamplerState {
        self.state
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn model(&self) -> &SplineMixtureModel {
        &self.model
    }

    pub fn current_coefficients(&self) -> ArrayView1<'_, f64> {
        self.current.view()
    }

    pub fn hyperparameters(&self) -> Hyperparameters {
        self.hyper
    }

    pub fn proposal_state(&self) -> ProposalState {
        self.tuning
    }

    pub fn current_log_posterior(&self) -> f64 {
        self.current_log_posterior
    }

    /// A handle that can stop [`AdaptiveSampler::run`] from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Sets the starting state and records it as iteration 0.
    pub fn initialize(&mut self, initial: InitialState) -> Result<(), SamplerError> {
        if self.state != SamplerState::Uninitialized {
            return Err(SamplerError::AlreadyInitialized);
        }
        if initial.v.len() != self.model.n_coefficients() {
            return Err(SamplerError::DimensionMismatch {
                what: "initial coefficient vector",
                expected: self.model.n_coefficients(),
                found: initial.v.len(),
            });
        }
        let Hyperparameters { phi, delta, tau } = initial.hyper;
        for (name, value) in [("phi", phi), ("delta", delta), ("tau", tau)] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "initial {name} must be finite and strictly positive, got {value}"
                ))
                .into());
            }
        }
        let ProposalState { sigma, accept_frac } = initial.proposal;
        if !(sigma.is_finite() && sigma > 0.0) || !(0.0..=1.0).contains(&accept_frac) {
            return Err(ConfigError::Invalid(format!(
                "initial proposal state must have sigma > 0 and accept_frac in [0, 1], got {sigma} and {accept_frac}"
            ))
            .into());
        }

        let log_posterior = bayes::log_posterior(
            initial.v.view(),
            &initial.hyper,
            &self.priors,
            self.data.view(),
            &self.model,
        )?;

        self.current.assign(&initial.v);
        self.proposal.assign(&initial.v);
        self.hyper = initial.hyper;
        self.tuning = initial.proposal;
        self.current_log_posterior = log_posterior;
        self.record_current();

        log::info!(
            "Initialised chain with k = {}, {} periodogram bins, log-posterior {:.4}",
            self.model.n_basis(),
            self.data.len(),
            log_posterior
        );
        self.state = if self.chain.len() == self.n_steps {
            SamplerState::Done
        } else {
            SamplerState::Initialized
        };
        Ok(())
    }

    /// Advances the chain by one recorded iteration (`thin` sweeps).
    ///
    /// Stepping a finished chain is a no-op that returns [`SamplerState::Done`].
    pub fn step(&mut self) -> Result<SamplerState, SamplerError> {
        match self.state {
            SamplerState::Uninitialized => return Err(SamplerError::NotInitialized),
            SamplerState::Done => return Ok(SamplerState::Done),
            SamplerState::Initialized | SamplerState::Running => {}
        }

        for _ in 0..self.thin {
            self.tuning.adapt();
            self.metropolis_sweep();
            self.gibbs_update()?;
        }
        self.record_current();

        let iteration = self.chain.len() - 1;
        if iteration % 100 == 0 {
            log::debug!(
                "Iteration {iteration}: log-posterior {:.4}, sigma {:.4e}, acceptance {:.2}, tau {:.4e}",
                self.current_log_posterior,
                self.tuning.sigma,
                self.tuning.accept_frac,
                self.hyper.tau
            );
        }

        self.state = if self.chain.len() == self.n_steps {
            SamplerState::Done
        } else {
            SamplerState::Running
        };
        Ok(self.state)
    }

    /// Steps until the chain is full or a stop is requested through a [`StopHandle`].
    ///
    /// A stopped run leaves only completed iterations in the chain.
    pub fn run(&mut self) -> Result<&Chain, SamplerError> {
        if self.state == SamplerState::Uninitialized {
            return Err(SamplerError::NotInitialized);
        }

        let pb = create_progress_bar(self.n_steps as u64, self.show_progress);
        pb.set_position(self.chain.len() as u64);

        while self.state != SamplerState::Done {
            if self.stop.is_stop_requested() {
                log::info!(
                    "Stop requested; keeping {} of {} iterations.",
                    self.chain.len(),
                    self.n_steps
                );
                break;
            }
            self.step()?;
            pb.set_position(self.chain.len() as u64);
        }
        pb.finish_and_clear();

        let accept = self.chain.accept_frac();
        let mean_accept = accept.iter().skip(1).sum::<f64>() / (accept.len().max(2) - 1) as f64;
        log::info!(
            "Chain finished with {} iterations; mean acceptance {:.3}, final log-posterior {:.4}",
            self.chain.len(),
            mean_accept,
            self.current_log_posterior
        );
        Ok(&self.chain)
    }

    /// Consumes the sampler and returns the chain without unfilled slots.
    pub fn into_chain(self) -> Chain {
        self.chain.trimmed()
    }

    /// Consumes the sampler and returns the trimmed chain with the model it was fitted with.
    pub fn into_parts(self) -> (Chain, SplineMixtureModel) {
        (self.chain.trimmed(), self.model)
    }

    fn record_current(&mut self) {
        self.chain.push(ChainRecord {
            v: self.current.view(),
            hyper: self.hyper,
            proposal: self.tuning,
            log_posterior: self.current_log_posterior,
        });
    }

    /// Log-posterior of the proposal buffer, with any degeneracy mapped to `-∞`.
    fn proposal_log_posterior(&self) -> f64 {
        match bayes::log_posterior(
            self.proposal.view(),
            &self.hyper,
            &self.priors,
            self.data.view(),
            &self.model,
        ) {
            Ok(lp) => lp,
            Err(err) => {
                log::trace!("Rejecting proposal: {err}");
                f64::NEG_INFINITY
            }
        }
    }

    /// One random-scan pass of single-coordinate Metropolis updates over `V`.
    fn metropolis_sweep(&mut self) {
        let sigma = self.tuning.sigma;
        self.scan_order.shuffle(&mut self.rng);

        let mut accept_count = 0usize;
        for g in 0..self.scan_order.len() {
            let pos = self.scan_order[g];
            let z: f64 = self.rng.sample(StandardNormal);
            let u: f64 = self.rng.sample(Open01);

            self.proposal[pos] = self.current[pos] + sigma * z;
            let lp_star = self.proposal_log_posterior();

            if metropolis_accepts(u.ln(), lp_star, self.current_log_posterior) {
                self.current[pos] = self.proposal[pos];
                self.current_log_posterior = lp_star;
                accept_count += 1;
            } else {
                self.proposal[pos] = self.current[pos];
            }
        }

        self.tuning.accept_frac = accept_count as f64 / self.scan_order.len() as f64;
    }

    /// Exact conditional draws of `(φ, δ, τ)`, then refreshes the current log-posterior.
    fn gibbs_update(&mut self) -> Result<(), SamplerError> {
        self.hyper = bayes::sample_hyperparameters(
            &mut self.rng,
            self.current.view(),
            &self.hyper,
            &self.priors,
            self.data.view(),
            &self.model,
        )?;
        self.current_log_posterior = bayes::log_posterior(
            self.current.view(),
            &self.hyper,
            &self.priors,
            self.data.view(),
            &self.model,
        )?;
        Ok(())
    }
}

/// Metropolis rule for a symmetric proposal: accept when `ln u < min(0, lp* - lp)`.
///
/// `log_u` is negative for `u` in `(0, 1)`, so a proposal that raises the
/// log-posterior is always accepted and a `-∞` proposal never is.
fn metropolis_accepts(log_u: f64, lp_star: f64, lp_current: f64) -> bool {
    log_u < (lp_star - lp_current).min(0.0)
}

fn create_progress_bar(len: u64, show: bool) -> ProgressBar {
    let draw_target = if show && std::io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(20)
    } else {
        ProgressDrawTarget::hidden()
    };

    let pb = ProgressBar::with_draw_target(Some(len), draw_target);
    if let Ok(style) =
        ProgressStyle::with_template("> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
    {
        pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
    }
    pb.set_message("sampling");
    pb
}
