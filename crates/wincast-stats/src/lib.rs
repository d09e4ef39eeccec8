//! Bounded ring buffers and recency-weighted average primitives.
//!
//! Every adaptive decision in the damage pipeline — the batch delay, the
//! target quality, the target speed — is driven by a short window of recent
//! observations rather than a single sample. [`StatsRing`] is the shared
//! bounded buffer used to hold that window; [`time_weighted_average`] and
//! [`percentile`] are the two ways components reduce it to a number.

#![cfg_attr(docsrs, feature(doc_cfg))]

use std::collections::VecDeque;
use std::time::Instant;

/// A fixed-capacity FIFO ring. Pushing past capacity evicts the oldest
/// element. Used for both latency samples (`StatsRing<(Instant, f64)>`) and
/// plain scalar history (`StatsRing<u32>`).
#[derive(Debug, Clone)]
pub struct StatsRing<T> {
    capacity: usize,
    buf: VecDeque<T>,
}

impl<T> StatsRing<T> {
    /// Creates an empty ring able to hold `capacity` elements before it
    /// starts evicting. `capacity == 0` degenerates to a ring that never
    /// retains anything, which is a valid (if useless) configuration.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buf: VecDeque::with_capacity(capacity),
        }
    }

    /// Appends a sample, evicting the oldest one if the ring is full.
    pub fn push(&mut self, item: T) {
        if self.capacity == 0 {
            return;
        }
        if self.buf.len() == self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(item);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.buf.iter()
    }

    /// Last (most recently pushed) element, if any.
    #[must_use]
    pub fn last(&self) -> Option<&T> {
        self.buf.back()
    }
}

impl<T: Clone> StatsRing<T> {
    /// Materializes the ring's current contents, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<T> {
        self.buf.iter().cloned().collect()
    }
}

impl<T> Default for StatsRing<T> {
    /// A ring with no capacity. Callers almost always want [`StatsRing::new`]
    /// instead; this exists for `#[derive(Default)]` convenience on structs
    /// that embed a ring behind a builder-populated capacity.
    fn default() -> Self {
        Self::new(0)
    }
}

/// Recency-weighted average of `(when, value)` samples.
///
/// Older samples are discounted by `rpow.powf(-age_seconds)`, floored at
/// `min_offset` so that ancient samples never drop to zero weight and
/// vanish entirely — a lone old sample still nudges the average, just far
/// less than a recent one. Returns `None` for an empty slice.
#[must_use]
pub fn time_weighted_average(
    samples: &[(Instant, f64)],
    now: Instant,
    min_offset: f64,
    rpow: f64,
) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let mut total_value = 0.0f64;
    let mut total_weight = 0.0f64;
    for (when, value) in samples {
        let age = now.saturating_duration_since(*when).as_secs_f64();
        let weight = rpow.powf(-age).max(min_offset);
        total_value += value * weight;
        total_weight += weight;
    }
    if total_weight == 0.0 {
        None
    } else {
        Some(total_value / total_weight)
    }
}

/// Nearest-rank percentile (`p` in `0.0..=100.0`) of an unordered sample
/// set. Sorts a clone of the input; callers on a hot path should batch
/// samples rather than call this per-frame.
#[must_use]
pub fn percentile(samples: &[f64], p: f64) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let p = p.clamp(0.0, 100.0);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let rank = (((p / 100.0) * (sorted.len() - 1) as f64).round()) as usize;
    sorted.get(rank.min(sorted.len() - 1)).copied()
}

/// Plain (unweighted) arithmetic mean, for callers that don't need recency
/// weighting.
#[must_use]
pub fn mean(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        None
    } else {
        #[allow(clippy::cast_precision_loss)]
        Some(samples.iter().sum::<f64>() / samples.len() as f64)
    }
}
