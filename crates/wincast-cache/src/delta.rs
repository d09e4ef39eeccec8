/// The last still-frame block sent for a window, kept so the next block of
/// the same shape and encoding can be sent as an XOR delta instead of in
/// full. At most one entry lives per window at a time — storing a new one
/// always replaces the old.
#[derive(Debug, Clone)]
pub struct DeltaEntry {
    pub width: u32,
    pub height: u32,
    pub encoding: String,
    pub sequence: u64,
    pub pixels: Vec<u8>,
}

/// Holds the single most recent [`DeltaEntry`] for one window and computes
/// XOR deltas against it.
#[derive(Debug, Default)]
pub struct DeltaCache {
    slot: Option<DeltaEntry>,
}

impl DeltaCache {
    #[must_use]
    pub fn new() -> Self {
        Self { slot: None }
    }

    #[must_use]
    pub fn current(&self) -> Option<&DeltaEntry> {
        self.slot.as_ref()
    }

    /// Drops the cached entry. Called on decode failure reported by the
    /// viewer, on cancellation, or whenever the encoding/dimensions change
    /// in a way that makes the old entry useless.
    pub fn invalidate(&mut self) {
        self.slot = None;
    }

    /// Replaces the cached entry. Always succeeds; the previous entry (if
    /// any) is dropped.
    pub fn store(&mut self, width: u32, height: u32, encoding: impl Into<String>, sequence: u64, pixels: Vec<u8>) {
        self.slot = Some(DeltaEntry {
            width,
            height,
            encoding: encoding.into(),
            sequence,
            pixels,
        });
    }

    /// Computes an XOR delta of `current` against the cached block, if one
    /// exists, matches `width`/`height`/`encoding`, and is the same length
    /// as `current`. Returns `None` (meaning: send `current` in full) when
    /// there is nothing eligible to diff against.
    #[must_use]
    pub fn try_delta(&self, width: u32, height: u32, encoding: &str, current: &[u8]) -> Option<Vec<u8>> {
        let entry = self.slot.as_ref()?;
        if entry.width != width || entry.height != height || entry.encoding != encoding {
            return None;
        }
        if entry.pixels.len() != current.len() {
            return None;
        }
        Some(xor_bytes(&entry.pixels, current))
    }
}

/// Byte-wise XOR of two equal-length buffers. Applying this function twice
/// with the same `b` recovers the original `a`: `xor(xor(a, b), b) == a`.
#[must_use]
pub fn xor_bytes(a: &[u8], b: &[u8]) -> Vec<u8> {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(x, y)| x ^ y).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_delta_without_a_cached_entry() {
        let cache = DeltaCache::new();
        assert!(cache.try_delta(4, 4, "png", &[0; 16]).is_none());
    }

    #[test]
    fn delta_round_trips() {
        let mut cache = DeltaCache::new();
        let original = vec![1u8, 2, 3, 4, 5, 6, 7, 8];
        cache.store(2, 2, "rgb24", 1, original.clone());

        let updated = vec![9u8, 2, 3, 40, 5, 6, 70, 8];
        let delta = cache.try_delta(2, 2, "rgb24", &updated).unwrap();
        let recovered = xor_bytes(&delta, &original);
        assert_eq!(recovered, updated);
    }

    #[test]
    fn shape_mismatch_yields_no_delta() {
        let mut cache = DeltaCache::new();
        cache.store(2, 2, "rgb24", 1, vec![0; 16]);
        assert!(cache.try_delta(4, 4, "rgb24", &[0; 64]).is_none());
        assert!(cache.try_delta(2, 2, "png", &[0; 16]).is_none());
    }

    #[test]
    fn invalidate_clears_the_slot() {
        let mut cache = DeltaCache::new();
        cache.store(2, 2, "rgb24", 1, vec![0; 16]);
        cache.invalidate();
        assert!(cache.current().is_none());
        assert!(cache.try_delta(2, 2, "rgb24", &[0; 16]).is_none());
    }

    #[test]
    fn storing_replaces_the_previous_entry() {
        let mut cache = DeltaCache::new();
        cache.store(2, 2, "rgb24", 1, vec![1; 16]);
        cache.store(2, 2, "rgb24", 2, vec![2; 16]);
        assert_eq!(cache.current().unwrap().sequence, 2);
    }
}
