use thiserror::Error;

/// Failures from constructing or (re)configuring a [`crate::ServerSource`].
/// Per the connection's error handling design, nothing raised once the
/// connection is running ever surfaces here — window-level failures are
/// caught, logged and turned into a dropped frame inside `wincast-window`.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid server source config: {0:?}")]
    InvalidConfig(Vec<String>),

    #[error("window {0:?} is already registered on this connection")]
    WindowAlreadyExists(wincast_types::WindowId),

    #[error("window {0:?} is not registered on this connection")]
    UnknownWindow(wincast_types::WindowId),
}

pub type Result<T> = std::result::Result<T, ServerError>;
