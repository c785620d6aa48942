//! Experiment configuration, read from TOML.
//!
//! Every field has a default, so an empty file (or no file at all) gives the
//! baseline scenario: one machine, five minute washes, a car roughly every
//! half minute, simulated for one day.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Minutes per simulated day.
pub const MINUTES_PER_DAY: f64 = 24.0 * 60.0;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// How the gap between two arriving cars is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArrivalPattern {
    /// `uniform(0, 1) * t_inter`
    #[default]
    Jittered,
    /// Exponential with mean `t_inter`.
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CarwashConfig {
    pub seed: u64,
    pub num_machines: usize,
    /// Minutes it takes to clean a car.
    pub wash_time: f64,
    /// Scale of the inter-arrival gap, in minutes.
    pub t_inter: f64,
    /// Cars already waiting when the carwash opens.
    pub initial_cars: usize,
    /// Simulated minutes for a single run.
    pub horizon: f64,
    pub arrivals: ArrivalPattern,
}

impl Default for CarwashConfig {
    fn default() -> Self {
        CarwashConfig {
            seed: 42,
            num_machines: 1,
            wash_time: 5.0,
            t_inter: 1.0,
            initial_cars: 4,
            horizon: MINUTES_PER_DAY,
            arrivals: ArrivalPattern::Jittered,
        }
    }
}

/// Growing-horizon timing harness: for every day count in `1..=days`, run
/// `iterations` reseeded simulations and report the mean wall-clock time.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BenchmarkConfig {
    pub days: usize,
    pub iterations: usize,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        BenchmarkConfig {
            days: 90,
            iterations: 5,
        }
    }
}

/// Independent seeds `seed..seed + scenarios`, run in parallel.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SweepConfig {
    pub scenarios: usize,
    /// Worker threads; rayon's global pool when absent.
    pub threads: Option<usize>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        SweepConfig {
            scenarios: 16,
            threads: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExperimentConfig {
    pub carwash: CarwashConfig,
    pub benchmark: BenchmarkConfig,
    pub sweep: SweepConfig,
}

impl ExperimentConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<ExperimentConfig, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        ExperimentConfig::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<ExperimentConfig, ConfigError> {
        let config: ExperimentConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, otherwise the defaults.
    pub fn load(path: Option<&Path>) -> Result<ExperimentConfig, ConfigError> {
        match path {
            Some(path) => ExperimentConfig::from_file(path),
            None => Ok(ExperimentConfig::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.carwash.validate()?;
        if self.benchmark.iterations == 0 {
            return Err(ConfigError::Invalid(
                "benchmark.iterations must be at least 1".into(),
            ));
        }
        if self.sweep.threads == Some(0) {
            return Err(ConfigError::Invalid(
                "sweep.threads must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl CarwashConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_machines == 0 {
            return Err(ConfigError::Invalid(
                "carwash.num_machines must be at least 1".into(),
            ));
        }
        if !(self.wash_time.is_finite() && self.wash_time > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "carwash.wash_time must be positive, got {}",
                self.wash_time
            )));
        }
        // A zero scale would spawn cars forever without the clock moving.
        if !(self.t_inter.is_finite() && self.t_inter > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "carwash.t_inter must be positive, got {}",
                self.t_inter
            )));
        }
        if !(self.horizon.is_finite() && self.horizon >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "carwash.horizon must be a non-negative number of minutes, got {}",
                self.horizon
            )));
        }
        Ok(())
    }
}
