use std::env;

use wincast_stats::StatsRing;

/// Per-window damage batching policy.
///
/// Defaults mirror the constants a headless display server has shipped with
/// for years: a 5ms floor, a 15s ceiling, a 50ms starting point, batching
/// re-evaluated at most once per second-fraction (`time_unit_s`), and a
/// forced-batch threshold of 50 events or roughly one megapixel per event
/// within that window.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// When `true`, batching is never bypassed even if the network looks
    /// idle (the "always batch" escape hatch used for debugging/testing).
    pub always: bool,
    /// Lower bound for `current_delay_ms`.
    pub min_delay_ms: u32,
    /// Upper bound for `current_delay_ms`.
    pub max_delay_ms: u32,
    /// Current delay applied before a delayed region is flushed. Adjusted
    /// by [`crate::Controller`] within `[min_delay_ms, max_delay_ms]`.
    pub current_delay_ms: u32,
    /// Window, in seconds, over which `max_events`/`max_pixels` are
    /// evaluated to decide whether to force batching even when the queue is
    /// otherwise empty.
    pub time_unit_s: f64,
    /// Event count within `time_unit_s` above which batching is forced.
    pub max_events: u32,
    /// Pixel-count-equivalent within `time_unit_s` above which batching is
    /// forced. Derived from `max_events` unless overridden.
    pub max_pixels: u64,
    /// Ring of recently *applied* delays (as opposed to the current target),
    /// used by diagnostics and by the controller's recency-weighted
    /// smoothing.
    pub recent_actual_delays: StatsRing<u32>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        let max_events = 50;
        Self {
            always: false,
            min_delay_ms: 5,
            max_delay_ms: 15_000,
            current_delay_ms: 50,
            time_unit_s: 1.0,
            max_events,
            max_pixels: u64::from(max_events) * 1024 * 1024,
            recent_actual_delays: StatsRing::new(64),
        }
    }
}

impl BatchConfig {
    #[must_use]
    pub fn builder() -> BatchConfigBuilder {
        BatchConfigBuilder::default()
    }

    /// Records the delay actually used for a flush, clamping it to the
    /// configured bounds first. Call this whenever a delayed region is sent,
    /// not whenever the target is recomputed.
    pub fn record_applied_delay(&mut self, delay_ms: u32) {
        let clamped = delay_ms.clamp(self.min_delay_ms, self.max_delay_ms);
        self.recent_actual_delays.push(clamped);
    }

    /// Whether `event_count` events carrying `pixel_count` pixels within the
    /// last `time_unit_s` should force this window into batching even if it
    /// would otherwise take the immediate-send fast path.
    #[must_use]
    pub fn should_force_batch(&self, event_count: u32, pixel_equivalent: u64) -> bool {
        self.always || event_count > self.max_events || pixel_equivalent > self.max_pixels
    }

    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut issues = Vec::new();
        if self.min_delay_ms > self.max_delay_ms {
            issues.push(format!(
                "min_delay_ms ({}) must be <= max_delay_ms ({})",
                self.min_delay_ms, self.max_delay_ms
            ));
        }
        if !(self.min_delay_ms..=self.max_delay_ms).contains(&self.current_delay_ms) {
            issues.push(format!(
                "current_delay_ms ({}) must be within [min_delay_ms, max_delay_ms]",
                self.current_delay_ms
            ));
        }
        if self.time_unit_s <= 0.0 {
            issues.push("time_unit_s must be > 0".to_owned());
        }
        if self.max_events == 0 {
            issues.push("max_events must be > 0".to_owned());
        }
        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }
}

/// Builder for [`BatchConfig`]. Chainable, `#[must_use]`-annotated setters.
#[derive(Debug, Default)]
pub struct BatchConfigBuilder {
    always: Option<bool>,
    min_delay_ms: Option<u32>,
    max_delay_ms: Option<u32>,
    start_delay_ms: Option<u32>,
    time_unit_s: Option<f64>,
    max_events: Option<u32>,
    max_pixels: Option<u64>,
    delay_history_capacity: Option<usize>,
}

impl BatchConfigBuilder {
    #[must_use]
    pub fn always(mut self, always: bool) -> Self {
        self.always = Some(always);
        self
    }

    #[must_use]
    pub fn min_delay_ms(mut self, ms: u32) -> Self {
        self.min_delay_ms = Some(ms);
        self
    }

    #[must_use]
    pub fn max_delay_ms(mut self, ms: u32) -> Self {
        self.max_delay_ms = Some(ms);
        self
    }

    #[must_use]
    pub fn start_delay_ms(mut self, ms: u32) -> Self {
        self.start_delay_ms = Some(ms);
        self
    }

    #[must_use]
    pub fn time_unit_s(mut self, s: f64) -> Self {
        self.time_unit_s = Some(s);
        self
    }

    #[must_use]
    pub fn max_events(mut self, n: u32) -> Self {
        self.max_events = Some(n);
        self
    }

    #[must_use]
    pub fn max_pixels(mut self, n: u64) -> Self {
        self.max_pixels = Some(n);
        self
    }

    #[must_use]
    pub fn delay_history_capacity(mut self, capacity: usize) -> Self {
        self.delay_history_capacity = Some(capacity);
        self
    }

    /// Applies `WINCAST_BATCH_*` environment overrides on top of whatever
    /// has already been set on the builder. Malformed values are ignored
    /// (logged at `warn!` by the caller via [`BatchConfig::validate`], not
    /// here — parsing failures are not configuration errors by themselves).
    #[must_use]
    pub fn from_env(mut self) -> Self {
        if let Ok(v) = env::var("WINCAST_BATCH_ALWAYS") {
            if let Ok(b) = v.parse() {
                self.always = Some(b);
            }
        }
        if let Ok(v) = env::var("WINCAST_BATCH_MIN_DELAY_MS") {
            if let Ok(n) = v.parse() {
                self.min_delay_ms = Some(n);
            }
        }
        if let Ok(v) = env::var("WINCAST_BATCH_MAX_DELAY_MS") {
            if let Ok(n) = v.parse() {
                self.max_delay_ms = Some(n);
            }
        }
        if let Ok(v) = env::var("WINCAST_BATCH_START_DELAY_MS") {
            if let Ok(n) = v.parse() {
                self.start_delay_ms = Some(n);
            }
        }
        if let Ok(v) = env::var("WINCAST_BATCH_TIME_UNIT_S") {
            if let Ok(n) = v.parse() {
                self.time_unit_s = Some(n);
            }
        }
        if let Ok(v) = env::var("WINCAST_BATCH_MAX_EVENTS") {
            if let Ok(n) = v.parse() {
                self.max_events = Some(n);
            }
        }
        self
    }

    #[must_use]
    pub fn build(self) -> BatchConfig {
        let defaults = BatchConfig::default();
        let max_events = self.max_events.unwrap_or(defaults.max_events);
        let start_delay_ms = self.start_delay_ms.unwrap_or(defaults.current_delay_ms);
        BatchConfig {
            always: self.always.unwrap_or(defaults.always),
            min_delay_ms: self.min_delay_ms.unwrap_or(defaults.min_delay_ms),
            max_delay_ms: self.max_delay_ms.unwrap_or(defaults.max_delay_ms),
            current_delay_ms: start_delay_ms,
            time_unit_s: self.time_unit_s.unwrap_or(defaults.time_unit_s),
            max_events,
            max_pixels: self
                .max_pixels
                .unwrap_or_else(|| u64::from(max_events) * 1024 * 1024),
            recent_actual_delays: StatsRing::new(
                self.delay_history_capacity
                    .unwrap_or_else(|| defaults.recent_actual_delays.capacity()),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let cfg = BatchConfig::default();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn builder_overrides_defaults() {
        let cfg = BatchConfig::builder()
            .min_delay_ms(10)
            .max_delay_ms(1000)
            .start_delay_ms(20)
            .build();
        assert_eq!(cfg.min_delay_ms, 10);
        assert_eq!(cfg.max_delay_ms, 1000);
        assert_eq!(cfg.current_delay_ms, 20);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_catches_inverted_bounds() {
        let cfg = BatchConfig::builder().min_delay_ms(100).max_delay_ms(50).build();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn force_batch_on_event_count() {
        let cfg = BatchConfig::builder().max_events(10).build();
        assert!(cfg.should_force_batch(11, 0));
        assert!(!cfg.should_force_batch(5, 0));
    }

    #[test]
    fn record_applied_delay_clamps() {
        let mut cfg = BatchConfig::builder().min_delay_ms(5).max_delay_ms(100).build();
        cfg.record_applied_delay(1000);
        assert_eq!(cfg.recent_actual_delays.last(), Some(&100));
    }
}
