//! The per-window adaptive damage state machine ([`WindowSource`]): batches
//! incoming damage, runs the encoding selector, drives the video/still
//! codecs, and schedules auto-refresh — the piece that wires `wincast-batch`,
//! `wincast-cache`, `wincast-codecs` and `wincast-stats` together for one
//! window.

#![cfg_attr(docsrs, feature(doc_cfg))]

mod config;
mod error;
mod interfaces;
mod scheduler;
mod source;

pub use config::{WindowSourceConfig, WindowSourceConfigBuilder};
pub use error::{Result, WindowError};
pub use interfaces::{BoxedCompressJob, ClientCapabilities, DamageQueue, DamageSource, PacketSink, SentCallback};
pub use scheduler::{BoxedTask, ManualScheduler, Scheduler, TimerId, TokioScheduler};
pub use source::{DamageOptions, WindowSource, WindowSourceHandles, WindowSourceState};
