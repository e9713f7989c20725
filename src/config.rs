//! Hyperparameters for the gradient-descent trainer.
//!
//! [`TrainConfig::default`] reproduces the reference run; [`TrainConfig::from_env`]
//! overrides individual fields from `MICRODIFF_*` environment variables.

use std::{env, str::FromStr};

use crate::error::ConfigError;

pub const ENV_SEED: &str = "MICRODIFF_SEED";
pub const ENV_LEARNING_RATE: &str = "MICRODIFF_LEARNING_RATE";
pub const ENV_STEPS: &str = "MICRODIFF_STEPS";
pub const ENV_LOG_EVERY: &str = "MICRODIFF_LOG_EVERY";
/// Comma-separated layer widths, e.g. `4,4,1`.
pub const ENV_LAYERS: &str = "MICRODIFF_LAYERS";

const DEFAULT_SEED: u64 = 42;
const DEFAULT_LEARNING_RATE: f64 = 0.01;
const DEFAULT_STEPS: usize = 200;
const DEFAULT_LOG_EVERY: usize = 10;
const DEFAULT_LAYERS: [usize; 3] = [4, 4, 1];

#[derive(Clone, Debug, PartialEq)]
pub struct TrainConfig {
    /// Seed for weight initialization.
    pub seed: u64,
    /// Output width of each layer; the last one is linear.
    pub layer_sizes: Vec<usize>,
    pub learning_rate: f64,
    pub steps: usize,
    /// Report the loss every this many steps (and at step 0).
    pub log_every: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            seed: DEFAULT_SEED,
            layer_sizes: DEFAULT_LAYERS.to_vec(),
            learning_rate: DEFAULT_LEARNING_RATE,
            steps: DEFAULT_STEPS,
            log_every: DEFAULT_LOG_EVERY,
        }
    }
}

impl TrainConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "learning_rate must be a positive number, got {}",
                self.learning_rate
            )));
        }
        if self.steps == 0 {
            return Err(ConfigError::Validation(
                "steps must be greater than 0".to_string(),
            ));
        }
        if self.log_every == 0 {
            return Err(ConfigError::Validation(
                "log_every must be greater than 0".to_string(),
            ));
        }
        if self.layer_sizes.is_empty() {
            return Err(ConfigError::Validation(
                "at least one layer is required".to_string(),
            ));
        }
        if self.layer_sizes.contains(&0) {
            return Err(ConfigError::Validation(format!(
                "layer sizes must be non-zero, got {:?}",
                self.layer_sizes
            )));
        }
        Ok(())
    }

    /// Builds a config from the environment, keeping defaults for unset keys.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(seed) = parsed(&lookup, ENV_SEED)? {
            config.seed = seed;
        }
        if let Some(learning_rate) = parsed(&lookup, ENV_LEARNING_RATE)? {
            config.learning_rate = learning_rate;
        }
        if let Some(steps) = parsed(&lookup, ENV_STEPS)? {
            config.steps = steps;
        }
        if let Some(log_every) = parsed(&lookup, ENV_LOG_EVERY)? {
            config.log_every = log_every;
        }
        if let Some(raw) = lookup(ENV_LAYERS) {
            config.layer_sizes = raw
                .split(',')
                .map(|width| parse(ENV_LAYERS, &raw, width.trim()))
                .collect::<Result<_, _>>()?;
        }
        Ok(config)
    }
}

fn parsed<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| parse(key, &raw, raw.trim()))
        .transpose()
}

fn parse<T>(key: &str, raw: &str, field: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    field.parse().map_err(|e: T::Err| ConfigError::Parse {
        key: key.to_string(),
        value: raw.to_string(),
        message: e.to_string(),
    })
}
