use std::env;

use wincast_window::WindowSourceConfig;

use crate::error::{Result, ServerError};

/// Connection-wide knobs: the mmap ring size offered to new windows, the
/// codec name the shared [`wincast_codecs::EncoderRegistry`] is queried for
/// when building each window's video pipeline, the capacity of the
/// connection-wide latency ring, and the default per-window config applied
/// to every [`wincast_window::WindowSource`] created on this connection
/// unless the caller overrides it.
#[derive(Debug, Clone)]
pub struct ServerSourceConfig {
    pub window_defaults: WindowSourceConfig,
    pub video_output_codec: &'static str,
    /// Size, in bytes, of the shared mmap ring handed to every window that
    /// negotiated `mmap` capability. `0` disables the mmap fast path for the
    /// whole connection.
    pub mmap_size: usize,
    /// Capacity of the connection-wide observation ring fed by every
    /// window's ACKs, used to estimate shared congestion.
    pub connection_stats_capacity: usize,
}

impl Default for ServerSourceConfig {
    fn default() -> Self {
        Self {
            window_defaults: WindowSourceConfig::default(),
            video_output_codec: "x264",
            mmap_size: 4 * 1024 * 1024,
            connection_stats_capacity: 256,
        }
    }
}

impl ServerSourceConfig {
    #[must_use]
    pub fn builder() -> ServerSourceConfigBuilder {
        ServerSourceConfigBuilder::default()
    }

    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut issues = Vec::new();
        if let Err(window_issues) = self.window_defaults.validate() {
            issues.extend(window_issues);
        }
        if self.connection_stats_capacity == 0 {
            issues.push("connection_stats_capacity must be > 0".to_owned());
        }
        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }

    pub fn build_validated(self) -> Result<Self> {
        self.validate().map_err(ServerError::InvalidConfig)?;
        Ok(self)
    }
}

/// Builder for [`ServerSourceConfig`], same shape as
/// [`wincast_window::WindowSourceConfigBuilder`].
#[derive(Debug, Default)]
pub struct ServerSourceConfigBuilder {
    window_defaults: Option<WindowSourceConfig>,
    video_output_codec: Option<&'static str>,
    mmap_size: Option<usize>,
    connection_stats_capacity: Option<usize>,
}

impl ServerSourceConfigBuilder {
    #[must_use]
    pub fn window_defaults(mut self, config: WindowSourceConfig) -> Self {
        self.window_defaults = Some(config);
        self
    }

    #[must_use]
    pub fn video_output_codec(mut self, codec: &'static str) -> Self {
        self.video_output_codec = Some(codec);
        self
    }

    #[must_use]
    pub fn mmap_size(mut self, bytes: usize) -> Self {
        self.mmap_size = Some(bytes);
        self
    }

    #[must_use]
    pub fn connection_stats_capacity(mut self, capacity: usize) -> Self {
        self.connection_stats_capacity = Some(capacity);
        self
    }

    /// Applies `WINCAST_MMAP_SIZE`/`WINCAST_CONNECTION_STATS_CAPACITY`
    /// overrides on top of whatever the per-window sub-config already
    /// picked up from the environment.
    #[must_use]
    pub fn from_env(mut self) -> Self {
        if let Ok(v) = env::var("WINCAST_MMAP_SIZE") {
            if let Ok(n) = v.parse() {
                self.mmap_size = Some(n);
            }
        }
        if let Ok(v) = env::var("WINCAST_CONNECTION_STATS_CAPACITY") {
            if let Ok(n) = v.parse() {
                self.connection_stats_capacity = Some(n);
            }
        }
        self
    }

    #[must_use]
    pub fn build(self) -> ServerSourceConfig {
        let defaults = ServerSourceConfig::default();
        ServerSourceConfig {
            window_defaults: self.window_defaults.unwrap_or(defaults.window_defaults),
            video_output_codec: self.video_output_codec.unwrap_or(defaults.video_output_codec),
            mmap_size: self.mmap_size.unwrap_or(defaults.mmap_size),
            connection_stats_capacity: self.connection_stats_capacity.unwrap_or(defaults.connection_stats_capacity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = ServerSourceConfig::default();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn builder_overrides_defaults() {
        let cfg = ServerSourceConfig::builder().mmap_size(0).connection_stats_capacity(16).build();
        assert_eq!(cfg.mmap_size, 0);
        assert_eq!(cfg.connection_stats_capacity, 16);
    }

    #[test]
    fn zero_stats_capacity_fails_validation() {
        let cfg = ServerSourceConfig::builder().connection_stats_capacity(0).build();
        assert!(cfg.validate().is_err());
    }
}
