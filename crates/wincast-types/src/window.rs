/// Opaque per-connection window identifier, assigned by the compositor-side
/// window model that owns the real window object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(pub u32);

/// Monotonically increasing per-window sequence, assigned at damage region
/// admission and carried through to ACK correlation and cancellation
/// checks. `0` is never assigned to real damage; it is reserved as a
/// "before anything was ever queued" sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DamageSequence(u64);

impl DamageSequence {
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The next sequence after this one. Panics (via checked overflow) only
    /// after `u64::MAX` damage events on a single window, which is not a
    /// realistic operating condition.
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0.checked_add(1).expect("damage sequence overflow"))
    }
}

impl Default for DamageSequence {
    fn default() -> Self {
        Self::zero()
    }
}

/// Static-ish properties of a window that influence batching and encoding
/// decisions, refreshed by the upstream source whenever they change
/// (resize, maximize, fullscreen toggle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowTraits {
    pub is_tray: bool,
    pub is_override_redirect: bool,
    pub has_alpha: bool,
    pub is_fullscreen: bool,
    pub is_maximized: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_increments() {
        let a = DamageSequence::zero();
        let b = a.next();
        assert!(b > a);
        assert_eq!(b.get(), 1);
    }
}
