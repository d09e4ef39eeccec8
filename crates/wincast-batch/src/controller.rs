use std::env;
use std::time::Instant;

use tracing::debug;
use wincast_stats::{time_weighted_average, StatsRing};

use crate::config::BatchConfig;

/// What the controller needs to know about the current connection in order
/// to recompute quality, speed and delay. Callers assemble this from the
/// window's and connection's [`wincast_stats::StatsRing`]s once per
/// recalculation tick.
#[derive(Debug, Clone, Copy)]
pub struct ControllerInputs<'a> {
    /// Recent round-trip samples: `(when sent, observed latency in ms)`.
    pub latency_samples_ms: &'a [(Instant, f64)],
    /// Packets queued but not yet acknowledged by the network-writer task.
    pub backlog_depth: u32,
    /// Network congestion estimate in `0.0..=1.0`, `0.0` meaning idle.
    pub congestion: f64,
}

/// Result of one controller tick: the new targets for the next frame(s).
/// `delay_ms` has already been clamped and recorded into the
/// [`BatchConfig`] passed to [`Controller::recalculate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerDecision {
    pub quality: u8,
    pub speed: u8,
    pub delay_ms: u32,
}

/// Fixed/minimum quality and speed pins, and the latency target the
/// controller steers toward.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Pins quality to an exact value and disables the adaptive loop for it.
    pub fixed_quality: Option<u8>,
    /// Floor below which quality is never allowed to drop, when not fixed.
    pub min_quality: u8,
    /// Pins speed to an exact value and disables the adaptive loop for it.
    pub fixed_speed: Option<u8>,
    /// Floor below which speed is never allowed to drop, when not fixed.
    pub min_speed: u8,
    /// Latency, in milliseconds, the controller treats as "on target". Above
    /// this, quality is traded away for speed and the batch delay widens.
    pub target_latency_ms: f64,
    /// `min_offset`/`rpow` passed to [`time_weighted_average`] for latency
    /// smoothing.
    pub smoothing_min_offset: f64,
    pub smoothing_rpow: f64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            fixed_quality: None,
            min_quality: 0,
            fixed_speed: None,
            min_speed: 0,
            target_latency_ms: 80.0,
            smoothing_min_offset: 0.1,
            smoothing_rpow: 1.2,
        }
    }
}

impl ControllerConfig {
    #[must_use]
    pub fn builder() -> ControllerConfigBuilder {
        ControllerConfigBuilder::default()
    }

    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut issues = Vec::new();
        if let Some(q) = self.fixed_quality {
            if q < self.min_quality {
                issues.push("fixed_quality must be >= min_quality".to_owned());
            }
        }
        if let Some(s) = self.fixed_speed {
            if s < self.min_speed {
                issues.push("fixed_speed must be >= min_speed".to_owned());
            }
        }
        if self.target_latency_ms <= 0.0 {
            issues.push("target_latency_ms must be > 0".to_owned());
        }
        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }
}

#[derive(Debug, Default)]
pub struct ControllerConfigBuilder {
    fixed_quality: Option<u8>,
    min_quality: Option<u8>,
    fixed_speed: Option<u8>,
    min_speed: Option<u8>,
    target_latency_ms: Option<f64>,
}

impl ControllerConfigBuilder {
    #[must_use]
    pub fn fixed_quality(mut self, q: u8) -> Self {
        self.fixed_quality = Some(q);
        self
    }

    #[must_use]
    pub fn min_quality(mut self, q: u8) -> Self {
        self.min_quality = Some(q);
        self
    }

    #[must_use]
    pub fn fixed_speed(mut self, s: u8) -> Self {
        self.fixed_speed = Some(s);
        self
    }

    #[must_use]
    pub fn min_speed(mut self, s: u8) -> Self {
        self.min_speed = Some(s);
        self
    }

    #[must_use]
    pub fn target_latency_ms(mut self, ms: f64) -> Self {
        self.target_latency_ms = Some(ms);
        self
    }

    /// Applies `WINCAST_QUALITY`/`WINCAST_MIN_QUALITY`/`WINCAST_SPEED`/
    /// `WINCAST_MIN_SPEED` overrides, matching the knob names in the
    /// external configuration contract.
    #[must_use]
    pub fn from_env(mut self) -> Self {
        if let Ok(v) = env::var("WINCAST_QUALITY") {
            if let Ok(q) = v.parse() {
                self.fixed_quality = Some(q);
            }
        }
        if let Ok(v) = env::var("WINCAST_MIN_QUALITY") {
            if let Ok(q) = v.parse() {
                self.min_quality = Some(q);
            }
        }
        if let Ok(v) = env::var("WINCAST_SPEED") {
            if let Ok(s) = v.parse() {
                self.fixed_speed = Some(s);
            }
        }
        if let Ok(v) = env::var("WINCAST_MIN_SPEED") {
            if let Ok(s) = v.parse() {
                self.min_speed = Some(s);
            }
        }
        self
    }

    #[must_use]
    pub fn build(self) -> ControllerConfig {
        let defaults = ControllerConfig::default();
        ControllerConfig {
            fixed_quality: self.fixed_quality,
            min_quality: self.min_quality.unwrap_or(defaults.min_quality),
            fixed_speed: self.fixed_speed,
            min_speed: self.min_speed.unwrap_or(defaults.min_speed),
            target_latency_ms: self.target_latency_ms.unwrap_or(defaults.target_latency_ms),
            ..defaults
        }
    }
}

/// Ring capacity for the instantaneous quality/speed history that
/// [`Controller::recalculate`] smooths via [`time_weighted_average`].
const TARGET_HISTORY_CAPACITY: usize = 64;

/// The adaptive control loop: reads recent latency/congestion observations
/// and writes new quality/speed targets plus a new batch delay, never more
/// than ~25 times a second per window (callers are expected to rate-limit
/// calls to [`Controller::recalculate`] themselves). Quality and speed are
/// not emitted as raw instantaneous values: each tick's computation is
/// pushed into a short history and the decision is the recency-weighted
/// average of that history, damped by `smoothing_min_offset`/
/// `smoothing_rpow`, so a single noisy sample can't whipsaw the target.
#[derive(Debug, Clone)]
pub struct Controller {
    config: ControllerConfig,
    quality_history: StatsRing<(Instant, f64)>,
    speed_history: StatsRing<(Instant, f64)>,
}

impl Controller {
    #[must_use]
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            config,
            quality_history: StatsRing::new(TARGET_HISTORY_CAPACITY),
            speed_history: StatsRing::new(TARGET_HISTORY_CAPACITY),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Recomputes quality, speed and delay from `inputs`, clamps the delay
    /// into `batch`'s bounds and records it into `batch.recent_actual_delays`.
    pub fn recalculate(
        &mut self,
        now: Instant,
        inputs: &ControllerInputs<'_>,
        batch: &mut BatchConfig,
    ) -> ControllerDecision {
        let avg_latency_ms = time_weighted_average(
            inputs.latency_samples_ms,
            now,
            self.config.smoothing_min_offset,
            self.config.smoothing_rpow,
        )
        .unwrap_or(self.config.target_latency_ms);

        let latency_ratio = avg_latency_ms / self.config.target_latency_ms;
        let congestion = inputs.congestion.clamp(0.0, 1.0);

        let quality = match self.config.fixed_quality {
            Some(q) => q,
            None => {
                let overshoot = (latency_ratio - 1.0).max(0.0) * 100.0;
                let penalty = overshoot + congestion * 40.0;
                let instantaneous = (100.0 - penalty).clamp(f64::from(self.config.min_quality), 100.0);
                self.quality_history.push((now, instantaneous));
                let smoothed = time_weighted_average(
                    &self.quality_history.snapshot(),
                    now,
                    self.config.smoothing_min_offset,
                    self.config.smoothing_rpow,
                )
                .unwrap_or(instantaneous);
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let clamped = smoothed.clamp(f64::from(self.config.min_quality), 100.0) as u8;
                clamped.max(self.config.min_quality)
            }
        };

        let speed = match self.config.fixed_speed {
            Some(s) => s,
            None => {
                let backlog_pressure = f64::from(inputs.backlog_depth.min(50)) * 2.0;
                let instantaneous = (congestion * 100.0 + backlog_pressure).clamp(f64::from(self.config.min_speed), 100.0);
                self.speed_history.push((now, instantaneous));
                let smoothed = time_weighted_average(
                    &self.speed_history.snapshot(),
                    now,
                    self.config.smoothing_min_offset,
                    self.config.smoothing_rpow,
                )
                .unwrap_or(instantaneous);
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let clamped = smoothed.clamp(f64::from(self.config.min_speed), 100.0) as u8;
                clamped.max(self.config.min_speed)
            }
        };

        let target_delay_ms = f64::from(batch.min_delay_ms)
            + (f64::from(batch.max_delay_ms) - f64::from(batch.min_delay_ms))
                * (latency_ratio - 1.0).clamp(0.0, 1.0);
        // Step halfway toward the target rather than jumping, so a single
        // noisy sample cannot whipsaw the batch delay.
        let stepped = f64::from(batch.current_delay_ms)
            + (target_delay_ms - f64::from(batch.current_delay_ms)) * 0.5;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let delay_ms = (stepped.round() as u32).clamp(batch.min_delay_ms, batch.max_delay_ms);

        batch.current_delay_ms = delay_ms;
        batch.record_applied_delay(delay_ms);

        debug!(
            quality,
            speed, delay_ms, avg_latency_ms, congestion, "controller recalculated targets"
        );

        ControllerDecision {
            quality,
            speed,
            delay_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn fixed_quality_and_speed_bypass_the_loop() {
        let mut controller = Controller::new(
            ControllerConfig::builder()
                .fixed_quality(77)
                .fixed_speed(33)
                .build(),
        );
        let mut batch = BatchConfig::default();
        let now = Instant::now();
        let decision = controller.recalculate(
            now,
            &ControllerInputs {
                latency_samples_ms: &[(now, 500.0)],
                backlog_depth: 10,
                congestion: 0.9,
            },
            &mut batch,
        );
        assert_eq!(decision.quality, 77);
        assert_eq!(decision.speed, 33);
    }

    #[test]
    fn high_latency_lowers_quality_and_raises_delay() {
        let mut controller = Controller::new(ControllerConfig::default());
        let mut batch = BatchConfig::builder().min_delay_ms(5).max_delay_ms(1000).build();
        let now = Instant::now();
        let baseline = controller.recalculate(
            now,
            &ControllerInputs {
                latency_samples_ms: &[(now, 80.0)],
                backlog_depth: 0,
                congestion: 0.0,
            },
            &mut batch.clone(),
        );
        let stressed = controller.recalculate(
            now,
            &ControllerInputs {
                latency_samples_ms: &[(now, 800.0)],
                backlog_depth: 20,
                congestion: 0.8,
            },
            &mut batch,
        );
        assert!(stressed.quality < baseline.quality);
        assert!(stressed.delay_ms > baseline.delay_ms);
    }

    #[test]
    fn delay_stays_within_bounds() {
        let mut controller = Controller::new(ControllerConfig::default());
        let mut batch = BatchConfig::builder().min_delay_ms(5).max_delay_ms(200).build();
        let now = Instant::now();
        let old = now - Duration::from_secs(5);
        let decision = controller.recalculate(
            now,
            &ControllerInputs {
                latency_samples_ms: &[(old, 5000.0)],
                backlog_depth: 100,
                congestion: 1.0,
            },
            &mut batch,
        );
        assert!(decision.delay_ms >= 5 && decision.delay_ms <= 200);
    }

    #[test]
    fn min_quality_floor_is_respected() {
        let mut controller = Controller::new(ControllerConfig::builder().min_quality(40).build());
        let mut batch = BatchConfig::default();
        let now = Instant::now();
        let decision = controller.recalculate(
            now,
            &ControllerInputs {
                latency_samples_ms: &[(now, 10_000.0)],
                backlog_depth: 50,
                congestion: 1.0,
            },
            &mut batch,
        );
        assert!(decision.quality >= 40);
    }
}
