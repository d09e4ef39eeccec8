//! # wincast
//!
//! Per-window adaptive damage batching, encoding selection and video
//! pipeline for headless display servers.
//!
//! This crate is a thin umbrella over the `wincast-*` sub-crates, each
//! owning one stage of the pipeline:
//!
//! - **[`stats`]** - bounded ring buffers and recency-weighted statistics
//! - **[`batch`]** - damage batching policy and the adaptive controller
//! - **[`cache`]** - delta/XOR still-frame cache and the mmap zero-copy path
//! - **[`codecs`]** - encoder registry, video pipeline, encoding selector
//! - **[`window`]** - the per-window damage state machine
//! - **[`server`]** - per-connection orchestration of window sources
//!
//! # Features
//!
//! All features are enabled by default. You can selectively enable only what
//! you need:
//!
//! ```toml
//! # Use everything (default)
//! wincast = "0.1"
//!
//! # Stats + batching only
//! wincast = { version = "0.1", default-features = false, features = ["batch"] }
//! ```
//!
//! | Feature   | Default | Description |
//! |-----------|---------|-------------|
//! | `stats`   | Yes | Ring-buffered latency/throughput sampling |
//! | `batch`   | Yes | Damage batching policy and adaptive controller |
//! | `cache`   | Yes | Delta cache and mmap fast path |
//! | `codecs`  | Yes | Encoder registry and video pipeline |
//! | `window`  | Yes | Per-window damage state machine |
//! | `server`  | Yes | Per-connection orchestration |
//! | `full`    | No  | All features from all sub-crates |
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use wincast::window::{WindowSource, WindowSourceHandles, DamageOptions};
//! use wincast::prelude::*;
//!
//! // Build the collaborators a WindowSource needs (compositor binding,
//! // packet sink, compressor queue, scheduler) then admit damage:
//! let window = WindowSource::new(window_id, handles, client_caps, config, "x264");
//! window.damage(Region::new(0, 0, 100, 100), DamageOptions::default());
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                              wincast                                │
//! ├───────────┬───────────┬───────────┬───────────┬──────────┬─────────┤
//! │   stats   │   batch   │   cache   │  codecs   │  window  │ server  │
//! │ StatsRing │Controller │DeltaCache │ Registry  │WindowSrc │ServerSrc│
//! │           │BatchConfig│MmapRegion │VideoPipe  │Scheduler │         │
//! └───────────┴───────────┴───────────┴───────────┴──────────┴─────────┘
//! ```
//!
//! Upstream (a compositor's framebuffer-change source) and downstream (a
//! wire protocol framer) are consumed as traits — [`window::DamageSource`],
//! [`window::PacketSink`], [`window::DamageQueue`] — so this crate never
//! depends on a concrete compositor or wire format.

#![cfg_attr(docsrs, feature(doc_cfg))]

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// =============================================================================
// RE-EXPORTS
// =============================================================================

/// Bounded ring buffers and recency-weighted statistics primitives.
///
/// See [`wincast_stats`] documentation for details.
#[cfg(feature = "stats")]
#[cfg_attr(docsrs, doc(cfg(feature = "stats")))]
pub use wincast_stats as stats;

/// Damage batching policy and the adaptive quality/speed/delay controller.
///
/// See [`wincast_batch`] documentation for details.
#[cfg(feature = "batch")]
#[cfg_attr(docsrs, doc(cfg(feature = "batch")))]
pub use wincast_batch as batch;

/// Delta/XOR still-frame cache and the mmap zero-copy fast path.
///
/// See [`wincast_cache`] documentation for details.
#[cfg(feature = "cache")]
#[cfg_attr(docsrs, doc(cfg(feature = "cache")))]
pub use wincast_cache as cache;

/// Still/video encoder registry, CSC+encoder pipeline scoring, and the
/// encoding selector.
///
/// See [`wincast_codecs`] documentation for details.
#[cfg(feature = "codecs")]
#[cfg_attr(docsrs, doc(cfg(feature = "codecs")))]
pub use wincast_codecs as codecs;

/// The per-window adaptive damage state machine.
///
/// See [`wincast_window`] documentation for details.
#[cfg(feature = "window")]
#[cfg_attr(docsrs, doc(cfg(feature = "window")))]
pub use wincast_window as window;

/// Per-connection orchestration of window sources.
///
/// See [`wincast_server`] documentation for details.
#[cfg(feature = "server")]
#[cfg_attr(docsrs, doc(cfg(feature = "server")))]
pub use wincast_server as server;

// =============================================================================
// PRELUDE - Common types for convenience
// =============================================================================

/// Prelude module with commonly used types.
///
/// ```rust
/// use wincast::prelude::*;
/// ```
pub mod prelude {
    #[cfg(feature = "stats")]
    pub use wincast_stats::StatsRing;

    #[cfg(feature = "batch")]
    pub use wincast_batch::{BatchConfig, Controller, ControllerConfig};

    #[cfg(feature = "cache")]
    pub use wincast_cache::{DeltaCache, MmapRegion};

    #[cfg(feature = "codecs")]
    pub use wincast_codecs::{EncoderRegistry, VideoPipeline};

    #[cfg(feature = "window")]
    pub use wincast_window::{
        ClientCapabilities, DamageOptions, DamageQueue, DamageSource, PacketSink, Scheduler, WindowSource,
        WindowSourceConfig, WindowSourceHandles, WindowSourceState,
    };

    #[cfg(feature = "server")]
    pub use wincast_server::{ServerSource, ServerSourceConfig, ServerSourceHandles};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    #[cfg(feature = "stats")]
    fn test_stats_reexport() {
        let ring: stats::StatsRing<u32> = stats::StatsRing::new(4);
        assert_eq!(ring.capacity(), 4);
    }

    #[test]
    #[cfg(feature = "batch")]
    fn test_batch_reexport() {
        let _ = batch::BatchConfig::default();
    }

    #[test]
    #[cfg(feature = "codecs")]
    fn test_codecs_reexport() {
        let _ = codecs::EncoderRegistry::with_defaults();
    }
}
