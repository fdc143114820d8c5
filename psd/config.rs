use crate::basis::KnotStrategy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

// --- Public Data Structures ---
// These structs define the human-readable run configuration, loadable from a
// TOML file. Keys also accept the Greek-letter spellings used in the papers.

/// Fixed hyperprior constants for the whole run. Every value must be strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Hyperpriors {
    #[serde(alias = "τα")]
    pub tau_alpha: f64,
    #[serde(alias = "τβ")]
    pub tau_beta: f64,
    #[serde(alias = "φα")]
    pub phi_alpha: f64,
    #[serde(alias = "φβ")]
    pub phi_beta: f64,
    #[serde(alias = "δα")]
    pub delta_alpha: f64,
    #[serde(alias = "δβ")]
    pub delta_beta: f64,
}

impl Default for Hyperpriors {
    fn default() -> Self {
        Self {
            tau_alpha: 0.001,
            tau_beta: 0.001,
            phi_alpha: 1.0,
            phi_beta: 1.0,
            delta_alpha: 1e-4,
            delta_beta: 1e-4,
        }
    }
}

impl Hyperpriors {
    fn named_values(&self) -> [(&'static str, f64); 6] {
        [
            ("tau_alpha", self.tau_alpha),
            ("tau_beta", self.tau_beta),
            ("phi_alpha", self.phi_alpha),
            ("phi_beta", self.phi_beta),
            ("delta_alpha", self.delta_alpha),
            ("delta_beta", self.delta_beta),
        ]
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in self.named_values() {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "hyperprior {name} must be finite and strictly positive, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Shape of the penalised B-spline mixture.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SplineConfig {
    /// Number of basis functions.
    pub k: usize,
    /// Polynomial degree of the B-splines (3 for cubic).
    pub degree: usize,
    /// Order of the difference penalty on the coefficient vector.
    #[serde(alias = "diffMatrixOrder")]
    pub diff_matrix_order: usize,
    pub knot_strategy: KnotStrategy,
}

impl Default for SplineConfig {
    fn default() -> Self {
        Self {
            k: 32,
            degree: 3,
            diff_matrix_order: 2,
            knot_strategy: KnotStrategy::Uniform,
        }
    }
}

impl SplineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.k < 2 {
            return Err(ConfigError::Invalid(format!(
                "k must be at least 2, got {}",
                self.k
            )));
        }
        if self.degree < 1 {
            return Err(ConfigError::Invalid(format!(
                "spline degree must be at least 1, got {}",
                self.degree
            )));
        }
        if self.k < self.degree + 1 {
            return Err(ConfigError::Invalid(format!(
                "k ({}) must be at least degree + 1 ({})",
                self.k,
                self.degree + 1
            )));
        }
        if self.diff_matrix_order == 0 || self.diff_matrix_order >= self.k - 1 {
            return Err(ConfigError::Invalid(format!(
                "diff_matrix_order ({}) must be positive and less than k - 1 ({})",
                self.diff_matrix_order,
                self.k - 1
            )));
        }
        Ok(())
    }
}

/// Budget and randomness for one MCMC chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Number of recorded iterations, including the initial state.
    pub n_steps: usize,
    /// Leading records discarded by the posterior summary.
    pub burnin: usize,
    /// Sweeps performed per recorded iteration.
    pub thin: usize,
    pub seed: u64,
    pub show_progress: bool,
    #[serde(flatten)]
    pub hyperpriors: Hyperpriors,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            n_steps: 1000,
            burnin: 250,
            thin: 1,
            seed: 42,
            show_progress: false,
            hyperpriors: Hyperpriors::default(),
        }
    }
}

impl SamplerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.n_steps == 0 {
            return Err(ConfigError::Invalid("n_steps must be positive".to_string()));
        }
        if self.thin == 0 {
            return Err(ConfigError::Invalid("thin must be positive".to_string()));
        }
        if self.burnin >= self.n_steps {
            return Err(ConfigError::Invalid(format!(
                "burnin ({}) must be smaller than n_steps ({})",
                self.burnin, self.n_steps
            )));
        }
        self.hyperpriors.validate()
    }
}

/// The complete configuration of a fit, as stored in a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub spline: SplineConfig,
    pub sampler: SamplerConfig,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl RunConfig {
    /// Loads and validates a configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config: RunConfig = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.spline.validate()?;
        self.sampler.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        RunConfig::default().validate().unwrap();
    }

    #[test]
    fn toml_accepts_greek_aliases() {
        let text = r#"
            [spline]
            k = 12
            diffMatrixOrder = 3
            knot_strategy = "Periodogram"

            [sampler]
            n_steps = 300
            burnin = 100
            thin = 2
            "τα" = 0.5
            "φβ" = 2.0
            delta_beta = 0.25
        "#;
        let config: RunConfig = toml::from_str(text).unwrap();
        assert_eq!(config.spline.k, 12);
        assert_eq!(config.spline.degree, 3);
        assert_eq!(config.spline.diff_matrix_order, 3);
        assert_eq!(config.spline.knot_strategy, KnotStrategy::Periodogram);
        assert_eq!(config.sampler.thin, 2);
        assert_eq!(config.sampler.hyperpriors.tau_alpha, 0.5);
        assert_eq!(config.sampler.hyperpriors.phi_beta, 2.0);
        assert_eq!(config.sampler.hyperpriors.delta_beta, 0.25);
        assert_eq!(config.sampler.hyperpriors.tau_beta, 0.001);
        config.validate().unwrap();
    }

    #[test]
    fn load_reads_and_validates_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sampler]\nn_steps = 10\nburnin = 20").unwrap();
        match RunConfig::load(file.path()).unwrap_err() {
            ConfigError::Invalid(msg) => assert!(msg.contains("burnin"), "{msg}"),
            other => panic!("Expected Invalid error, got {other:?}"),
        }
    }

    #[test]
    fn rejects_invalid_values() {
        let mut config = RunConfig::default();
        config.sampler.hyperpriors.phi_alpha = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = RunConfig::default();
        config.spline.k = 1;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = RunConfig::default();
        config.spline.k = 3;
        config.spline.degree = 3;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = RunConfig::default();
        config.spline.diff_matrix_order = 31;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = RunConfig::default();
        config.sampler.thin = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
