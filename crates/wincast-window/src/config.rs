use std::env;

use wincast_batch::{BatchConfig, BatchConfigBuilder, ControllerConfig, ControllerConfigBuilder};

use crate::error::{Result, WindowError};

/// Everything one [`crate::WindowSource`] needs beyond its collaborators:
/// the batching policy, the adaptive controller's targets, and the
/// auto-refresh knobs.
#[derive(Debug, Clone)]
pub struct WindowSourceConfig {
    pub batch: BatchConfig,
    pub controller: ControllerConfig,
    /// Minimum delay, in milliseconds, before a refresh fires; the actual
    /// delay used is `max(50, auto_refresh_delay_ms, current_delay_ms * 4)`.
    pub auto_refresh_delay_ms: u32,
    /// A lossy send with quality below this (or partial window coverage)
    /// arms the refresh timer.
    pub auto_refresh_threshold: u8,
    pub auto_refresh_quality: u8,
    pub auto_refresh_speed: u8,
    /// Pins the encoding used for the refresh send; `None` reuses whatever
    /// encoding the window is currently on.
    pub auto_refresh_encoding: Option<String>,
}

impl Default for WindowSourceConfig {
    fn default() -> Self {
        Self {
            batch: BatchConfig::default(),
            controller: ControllerConfig::default(),
            auto_refresh_delay_ms: 150,
            auto_refresh_threshold: 90,
            auto_refresh_quality: 95,
            auto_refresh_speed: 0,
            auto_refresh_encoding: None,
        }
    }
}

impl WindowSourceConfig {
    #[must_use]
    pub fn builder() -> WindowSourceConfigBuilder {
        WindowSourceConfigBuilder::default()
    }

    /// The refresh timer delay for a send made while `current_delay_ms` is
    /// in effect: `max(50ms, auto_refresh_delay, current_delay x 4)`.
    #[must_use]
    pub fn refresh_delay_ms(&self, current_delay_ms: u32) -> u32 {
        self.auto_refresh_delay_ms.max(50).max(current_delay_ms.saturating_mul(4))
    }

    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut issues = Vec::new();
        if let Err(batch_issues) = self.batch.validate() {
            issues.extend(batch_issues);
        }
        if let Err(controller_issues) = self.controller.validate() {
            issues.extend(controller_issues);
        }
        if self.auto_refresh_threshold > 100 {
            issues.push("auto_refresh_threshold must be <= 100".to_owned());
        }
        if self.auto_refresh_quality > 100 {
            issues.push("auto_refresh_quality must be <= 100".to_owned());
        }
        if self.auto_refresh_speed > 100 {
            issues.push("auto_refresh_speed must be <= 100".to_owned());
        }
        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }

    pub fn build_validated(self) -> Result<Self> {
        self.validate().map_err(WindowError::InvalidConfig)?;
        Ok(self)
    }
}

/// Builder for [`WindowSourceConfig`]. Delegates the batch/controller
/// sub-configs to their own builders rather than re-declaring every field.
#[derive(Debug, Default)]
pub struct WindowSourceConfigBuilder {
    batch: BatchConfigBuilder,
    controller: ControllerConfigBuilder,
    auto_refresh_delay_ms: Option<u32>,
    auto_refresh_threshold: Option<u8>,
    auto_refresh_quality: Option<u8>,
    auto_refresh_speed: Option<u8>,
    auto_refresh_encoding: Option<String>,
}

impl WindowSourceConfigBuilder {
    #[must_use]
    pub fn batch(mut self, f: impl FnOnce(BatchConfigBuilder) -> BatchConfigBuilder) -> Self {
        self.batch = f(self.batch);
        self
    }

    #[must_use]
    pub fn controller(mut self, f: impl FnOnce(ControllerConfigBuilder) -> ControllerConfigBuilder) -> Self {
        self.controller = f(self.controller);
        self
    }

    #[must_use]
    pub fn auto_refresh_delay_ms(mut self, ms: u32) -> Self {
        self.auto_refresh_delay_ms = Some(ms);
        self
    }

    #[must_use]
    pub fn auto_refresh_threshold(mut self, threshold: u8) -> Self {
        self.auto_refresh_threshold = Some(threshold);
        self
    }

    #[must_use]
    pub fn auto_refresh_quality(mut self, quality: u8) -> Self {
        self.auto_refresh_quality = Some(quality);
        self
    }

    #[must_use]
    pub fn auto_refresh_speed(mut self, speed: u8) -> Self {
        self.auto_refresh_speed = Some(speed);
        self
    }

    #[must_use]
    pub fn auto_refresh_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.auto_refresh_encoding = Some(encoding.into());
        self
    }

    /// Applies `WINCAST_*` environment overrides to every sub-config plus
    /// the auto-refresh knobs, matching the external configuration
    /// contract's "environment overrides with the same names" rule.
    #[must_use]
    pub fn from_env(mut self) -> Self {
        self.batch = self.batch.from_env();
        self.controller = self.controller.from_env();
        if let Ok(v) = env::var("WINCAST_AUTO_REFRESH_DELAY_MS") {
            if let Ok(n) = v.parse() {
                self.auto_refresh_delay_ms = Some(n);
            }
        }
        if let Ok(v) = env::var("WINCAST_AUTO_REFRESH_THRESHOLD") {
            if let Ok(n) = v.parse() {
                self.auto_refresh_threshold = Some(n);
            }
        }
        if let Ok(v) = env::var("WINCAST_AUTO_REFRESH_QUALITY") {
            if let Ok(n) = v.parse() {
                self.auto_refresh_quality = Some(n);
            }
        }
        if let Ok(v) = env::var("WINCAST_AUTO_REFRESH_SPEED") {
            if let Ok(n) = v.parse() {
                self.auto_refresh_speed = Some(n);
            }
        }
        if let Ok(v) = env::var("WINCAST_AUTO_REFRESH_ENCODING") {
            self.auto_refresh_encoding = Some(v);
        }
        self
    }

    #[must_use]
    pub fn build(self) -> WindowSourceConfig {
        let defaults = WindowSourceConfig::default();
        WindowSourceConfig {
            batch: self.batch.build(),
            controller: self.controller.build(),
            auto_refresh_delay_ms: self.auto_refresh_delay_ms.unwrap_or(defaults.auto_refresh_delay_ms),
            auto_refresh_threshold: self.auto_refresh_threshold.unwrap_or(defaults.auto_refresh_threshold),
            auto_refresh_quality: self.auto_refresh_quality.unwrap_or(defaults.auto_refresh_quality),
            auto_refresh_speed: self.auto_refresh_speed.unwrap_or(defaults.auto_refresh_speed),
            auto_refresh_encoding: self.auto_refresh_encoding,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = WindowSourceConfig::default();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn refresh_delay_takes_the_largest_bound() {
        let cfg = WindowSourceConfig::builder().auto_refresh_delay_ms(10).build();
        assert_eq!(cfg.refresh_delay_ms(5), 50);
        assert_eq!(cfg.refresh_delay_ms(100), 400);
    }

    #[test]
    fn builder_threads_through_sub_configs() {
        let cfg = WindowSourceConfig::builder()
            .batch(|b| b.min_delay_ms(10).max_delay_ms(2000))
            .controller(|c| c.fixed_quality(80))
            .build();
        assert_eq!(cfg.batch.min_delay_ms, 10);
        assert_eq!(cfg.controller.fixed_quality, Some(80));
    }

    #[test]
    fn out_of_range_auto_refresh_threshold_fails_validation() {
        let cfg = WindowSourceConfig::builder().auto_refresh_threshold(255).build();
        assert!(cfg.validate().is_err());
    }
}
