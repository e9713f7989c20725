use thiserror::Error;

/// Misuse of the network and training layers. The engine itself never fails:
/// arithmetic trouble surfaces as NaN or infinity in the values.
#[derive(Error, Debug, PartialEq, Clone)]
pub enum Error {
    #[error("expected at least one input value")]
    EmptyInput,

    #[error("input size mismatch: expected {expected}, got {actual}")]
    InputSizeMismatch { expected: usize, actual: usize },

    #[error("got {actual} targets for {expected} predictions")]
    TargetSizeMismatch { expected: usize, actual: usize },

    #[error("invalid architecture: {0}")]
    InvalidArchitecture(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors produced when loading or validating a [`crate::config::TrainConfig`].
#[derive(Error, Debug, PartialEq, Clone)]
pub enum ConfigError {
    #[error("config validation: {0}")]
    Validation(String),

    #[error("env var {key}={value:?}: {message}")]
    Parse {
        key: String,
        value: String,
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
