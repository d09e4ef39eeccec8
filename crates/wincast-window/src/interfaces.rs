use wincast_types::{DrawPacket, Image, Region, WindowId, WindowTraits};

/// Called by the packet sink around the actual write: once before the
/// first byte (with `0`) and once after the last byte (with the total byte
/// count). Sent timestamps feed the per-window/per-connection `StatsRing`.
pub type SentCallback = Box<dyn FnOnce(u64) + Send>;

/// A closure that runs the CSC+encode pipeline for one region off the
/// event task. Enqueued by `WindowSource` onto a [`DamageQueue`] and run by
/// the compressor task(s).
pub type BoxedCompressJob = Box<dyn FnOnce() + Send>;

/// Upstream collaborator: the framebuffer-change source `WindowSource`
/// pulls pixels and window state from. Implemented by whatever binds this
/// crate to a concrete compositor; `wincast-window` itself never depends on
/// one.
pub trait DamageSource: Send + Sync {
    /// Must be called before pixels for `window` are read, per the
    /// upstream contract's `acknowledge_changes()` guarantee.
    fn acknowledge_changes(&self, window: WindowId);

    /// Reads the current pixels of `region` within `window`. `None` means
    /// the window is gone; the caller treats that as a no-op, not an
    /// error.
    fn get_rgb_rawdata(&self, window: WindowId, region: Region) -> Option<Box<dyn Image>>;

    fn window_traits(&self, window: WindowId) -> Option<WindowTraits>;

    fn window_dimensions(&self, window: WindowId) -> Option<(u32, u32)>;

    fn is_managed(&self, window: WindowId) -> bool;
}

/// Downstream collaborator: accepts framed draw packets. Framing and
/// on-wire compression are this trait's implementor's concern, not
/// `wincast-window`'s.
pub trait PacketSink: Send + Sync {
    fn queue_packet(&self, packet: DrawPacket, start_send: SentCallback, sent: SentCallback);
}

/// Downstream collaborator: runs compression work off the event task.
/// A single implementation backed by a thread pool serializes at most one
/// job per window via the per-window pipeline mutex that lives inside
/// `WindowSource`; different windows may run concurrently.
pub trait DamageQueue: Send + Sync {
    fn queue_damage(&self, job: BoxedCompressJob);
}

/// Client capability map consumed once at connection time. Nothing in
/// `wincast-window` mutates this after construction — a client that wants
/// to change capabilities mid-session reconnects.
#[derive(Debug, Clone, Default)]
pub struct ClientCapabilities {
    pub rgb_formats: Vec<String>,
    /// Encodings the client will accept as an XOR delta against a cached
    /// previous block. A subset of `{png, rgb24, rgb32}` in practice.
    pub supports_delta: Vec<String>,
    pub encoding_client_options: bool,
    pub rgb24zlib: bool,
    pub mmap: bool,
    pub uses_swscale: bool,
    pub csc_modes: Vec<String>,
    pub video_scaling: bool,
    pub csc_atoms: bool,
}

impl ClientCapabilities {
    #[must_use]
    pub fn supports_delta_for(&self, encoding: &str) -> bool {
        self.supports_delta.iter().any(|e| e == encoding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supports_delta_for_checks_membership() {
        let caps = ClientCapabilities {
            supports_delta: vec!["png".to_owned(), "rgb24".to_owned()],
            ..ClientCapabilities::default()
        };
        assert!(caps.supports_delta_for("png"));
        assert!(!caps.supports_delta_for("jpeg"));
    }
}
