//! Per-connection orchestration of [`wincast_window::WindowSource`]s: owns
//! the collaborators they share (packet sequence counter, encoder registry,
//! mmap ring) and a small amount of connection-wide observation.

#![cfg_attr(docsrs, feature(doc_cfg))]

mod config;
mod error;
mod source;

pub use config::{ServerSourceConfig, ServerSourceConfigBuilder};
pub use error::{Result, ServerError};
pub use source::{ServerSource, ServerSourceHandles};
