use thiserror::Error;

/// Errors raised while constructing or validating a [`crate::WindowSourceConfig`].
/// Never raised from the hot per-frame path — runtime adaptation degrades
/// silently, it does not fail, matching the crate's error handling design.
#[derive(Debug, Error)]
pub enum WindowError {
    #[error("invalid window source config: {0:?}")]
    InvalidConfig(Vec<String>),
}

pub type Result<T> = std::result::Result<T, WindowError>;
