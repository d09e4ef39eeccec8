//! Damage batching policy ([`BatchConfig`]) and the adaptive controller
//! ([`Controller`]) that keeps it, plus target quality/speed, tracking real
//! network conditions.

#![cfg_attr(docsrs, feature(doc_cfg))]

mod config;
mod controller;
mod error;

pub use config::{BatchConfig, BatchConfigBuilder};
pub use controller::{Controller, ControllerConfig, ControllerConfigBuilder, ControllerDecision, ControllerInputs};
pub use error::{BatchError, Result};
