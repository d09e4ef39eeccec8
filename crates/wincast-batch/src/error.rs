use thiserror::Error;

/// Errors raised while constructing or validating batching/controller
/// configuration. Never raised from the hot per-frame path — see the
/// crate's error handling design: runtime adaptation degrades silently,
/// it does not fail.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("invalid batch config: {0}")]
    InvalidConfig(String),

    #[error("invalid controller config: {0}")]
    InvalidControllerConfig(String),

    #[error("environment variable {name} has an invalid value: {value}")]
    InvalidEnvValue { name: String, value: String },
}

pub type Result<T> = std::result::Result<T, BatchError>;
