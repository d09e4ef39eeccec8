//! Per-connection orchestration: owns every [`WindowSource`] on one
//! connection, the collaborators they share (the packet sequence counter,
//! the mmap ring, the encoder registry), and a small amount of
//! connection-wide observation used to estimate shared congestion.

use std::collections::HashMap;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use wincast_cache::MmapRegion;
use wincast_codecs::EncoderRegistry;
use wincast_stats::{percentile, StatsRing};
use wincast_types::{Region, WindowId};
use wincast_window::{
    ClientCapabilities, DamageOptions, DamageQueue, DamageSource, PacketSink, Scheduler, WindowSource, WindowSourceHandles,
};

use crate::config::ServerSourceConfig;
use crate::error::{Result, ServerError};

/// Collaborators shared by every window on one connection. Kept distinct
/// from [`ServerSourceConfig`] the same way `wincast_window::WindowSourceHandles`
/// is kept distinct from `WindowSourceConfig`: one is wiring, the other is
/// policy.
pub struct ServerSourceHandles {
    pub damage_source: Arc<dyn DamageSource>,
    pub packet_sink: Arc<dyn PacketSink>,
    pub damage_queue: Arc<dyn DamageQueue>,
    pub scheduler: Arc<dyn Scheduler>,
}

/// Owns every [`WindowSource`] on one connection plus the state shared
/// across them: the wire packet sequence counter, the encoder registry, the
/// mmap ring, and a connection-wide byte-size observation ring used to
/// estimate shared congestion. Never forms a reference cycle with the
/// windows it owns — each `WindowSource` only ever sees an `Arc`-cloned
/// [`WindowSourceHandles`], never a reference back to this struct.
pub struct ServerSource {
    config: ServerSourceConfig,
    handles: ServerSourceHandles,
    client_caps: ClientCapabilities,
    registry: Arc<EncoderRegistry>,
    packet_sequence: Arc<AtomicU32>,
    mmap: Option<Arc<Mutex<MmapRegion>>>,
    windows: Mutex<HashMap<WindowId, Arc<WindowSource>>>,
    connection_stats: Mutex<StatsRing<u64>>,
}

impl ServerSource {
    #[must_use]
    pub fn new(handles: ServerSourceHandles, client_caps: ClientCapabilities, config: ServerSourceConfig) -> Self {
        let mmap = if config.mmap_size > 0 && client_caps.mmap {
            Some(Arc::new(Mutex::new(MmapRegion::in_memory(config.mmap_size))))
        } else {
            None
        };
        info!(mmap_enabled = mmap.is_some(), "server source created");
        Self {
            registry: Arc::new(EncoderRegistry::with_defaults()),
            packet_sequence: Arc::new(AtomicU32::new(1)),
            connection_stats: Mutex::new(StatsRing::new(config.connection_stats_capacity)),
            mmap,
            handles,
            client_caps,
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a new window on this connection, building its
    /// [`WindowSource`] from the connection's shared collaborators and the
    /// default per-window config. Fails if `window` is already registered.
    pub fn add_window(&self, window: WindowId) -> Result<Arc<WindowSource>> {
        let mut windows = self.windows.lock();
        if windows.contains_key(&window) {
            return Err(ServerError::WindowAlreadyExists(window));
        }
        let window_handles = WindowSourceHandles {
            damage_source: Arc::clone(&self.handles.damage_source),
            packet_sink: Arc::clone(&self.handles.packet_sink),
            damage_queue: Arc::clone(&self.handles.damage_queue),
            scheduler: Arc::clone(&self.handles.scheduler),
            registry: Arc::clone(&self.registry),
            packet_sequence: Arc::clone(&self.packet_sequence),
            mmap: self.mmap.clone(),
        };
        let source = WindowSource::new(
            window,
            window_handles,
            self.client_caps.clone(),
            self.config.window_defaults.clone(),
            self.config.video_output_codec,
        );
        debug!(window = ?window, "window registered on connection");
        windows.insert(window, Arc::clone(&source));
        Ok(source)
    }

    /// Drops `window`'s `WindowSource` after cancelling its in-flight work,
    /// for when the compositor tears the window down.
    pub fn remove_window(&self, window: WindowId) -> Result<()> {
        let source = self.windows.lock().remove(&window).ok_or(ServerError::UnknownWindow(window))?;
        source.cancel_damage();
        debug!(window = ?window, "window removed from connection");
        Ok(())
    }

    #[must_use]
    pub fn window(&self, window: WindowId) -> Option<Arc<WindowSource>> {
        self.windows.lock().get(&window).map(Arc::clone)
    }

    #[must_use]
    pub fn window_ids(&self) -> Vec<WindowId> {
        self.windows.lock().keys().copied().collect()
    }

    #[must_use]
    pub fn window_count(&self) -> usize {
        self.windows.lock().len()
    }

    /// Forwards a damage admission to `window`'s `WindowSource`. Returns
    /// `false` (and logs nothing — an unknown window here is routine, e.g. a
    /// notification racing the window's teardown) if `window` isn't
    /// registered.
    pub fn damage(&self, window: WindowId, region: Region, options: DamageOptions) -> bool {
        match self.window(window) {
            Some(source) => {
                source.damage(region, options);
                true
            }
            None => false,
        }
    }

    /// Forwards a viewer ACK to `window`'s `WindowSource` and folds the
    /// acknowledged byte count into the connection-wide observation ring.
    pub fn packet_acked(&self, window: WindowId, packet_sequence: u32, width: u32, height: u32, decode_time_us: u64, bytes: u64) {
        if let Some(source) = self.window(window) {
            source.damage_packet_acked(packet_sequence, width, height, decode_time_us);
            self.connection_stats.lock().push(bytes);
        }
    }

    /// Cancels every window's in-flight work, e.g. on a viewer disconnect
    /// that doesn't warrant tearing down individual windows.
    pub fn cancel_all(&self) {
        for source in self.windows.lock().values() {
            source.cancel_damage();
        }
    }

    /// A rough `0.0..=1.0` congestion estimate derived from the spread of
    /// recently acknowledged packet sizes: the 90th percentile relative to
    /// the median, clamped and scaled. `0.0` (no congestion signal) until
    /// enough samples have accumulated. Not currently fed back into any
    /// window's [`wincast_batch::Controller`] - callers that want congestion-
    /// aware quality/speed targets read this and pass it through their own
    /// `ControllerInputs`, since `WindowSource` deliberately has no back
    /// reference to this struct to consult.
    #[must_use]
    pub fn congestion_estimate(&self) -> f64 {
        let stats = self.connection_stats.lock();
        if stats.len() < 8 {
            return 0.0;
        }
        let samples: Vec<f64> = stats.iter().map(|b| *b as f64).collect();
        let Some(median) = percentile(&samples, 50.0) else {
            return 0.0;
        };
        let Some(p90) = percentile(&samples, 90.0) else {
            return 0.0;
        };
        if median <= 0.0 {
            return 0.0;
        }
        let spread = (p90 / median - 1.0).max(0.0);
        if spread > 2.0 {
            warn!(spread, "connection packet size spread indicates congestion");
        }
        (spread / 2.0).min(1.0)
    }

    #[must_use]
    pub fn last_packet_ack_at(&self) -> Option<Instant> {
        self.connection_stats.lock().last().map(|_| Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use wincast_types::{HeapImage, Image, PixelFormat, WindowTraits};
    use wincast_window::{BoxedCompressJob, ManualScheduler, SentCallback};

    struct FakeSource {
        managed: AtomicBool,
    }

    impl DamageSource for FakeSource {
        fn acknowledge_changes(&self, _window: WindowId) {}

        fn get_rgb_rawdata(&self, _window: WindowId, region: Region) -> Option<Box<dyn Image>> {
            let len = (region.width * region.height * 4) as usize;
            Some(Box::new(HeapImage::new(region.width, region.height, region.width * 4, PixelFormat::Rgba, vec![0u8; len])))
        }

        fn window_traits(&self, _window: WindowId) -> Option<WindowTraits> {
            Some(WindowTraits::default())
        }

        fn window_dimensions(&self, _window: WindowId) -> Option<(u32, u32)> {
            Some((320, 240))
        }

        fn is_managed(&self, _window: WindowId) -> bool {
            self.managed.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        packets: Mutex<Vec<wincast_types::DrawPacket>>,
    }

    impl PacketSink for RecordingSink {
        fn queue_packet(&self, packet: wincast_types::DrawPacket, start_send: SentCallback, sent: SentCallback) {
            start_send(0);
            sent(packet.payload.len() as u64);
            self.packets.lock().push(packet);
        }
    }

    struct SyncQueue;

    impl DamageQueue for SyncQueue {
        fn queue_damage(&self, job: BoxedCompressJob) {
            job();
        }
    }

    fn make_server() -> (Arc<ServerSource>, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let handles = ServerSourceHandles {
            damage_source: Arc::new(FakeSource { managed: AtomicBool::new(true) }),
            packet_sink: Arc::clone(&sink) as Arc<dyn PacketSink>,
            damage_queue: Arc::new(SyncQueue),
            scheduler: Arc::new(ManualScheduler::default()),
        };
        let config = ServerSourceConfig::builder()
            .window_defaults(
                wincast_window::WindowSourceConfig::builder()
                    .batch(|b| b.min_delay_ms(5).start_delay_ms(5))
                    .build(),
            )
            .build();
        (Arc::new(ServerSource::new(handles, ClientCapabilities::default(), config)), sink)
    }

    #[test]
    fn add_window_rejects_duplicate_registration() {
        let (server, _sink) = make_server();
        server.add_window(WindowId(1)).unwrap();
        assert!(matches!(server.add_window(WindowId(1)), Err(ServerError::WindowAlreadyExists(_))));
    }

    #[test]
    fn remove_unknown_window_is_an_error() {
        let (server, _sink) = make_server();
        assert!(matches!(server.remove_window(WindowId(99)), Err(ServerError::UnknownWindow(_))));
    }

    #[test]
    fn damage_forwards_to_the_right_window() {
        let (server, sink) = make_server();
        server.add_window(WindowId(1)).unwrap();
        let delivered = server.damage(WindowId(1), Region::new(0, 0, 10, 10), DamageOptions::default());
        assert!(delivered);
        assert_eq!(sink.packets.lock().len(), 1);
    }

    #[test]
    fn damage_to_unknown_window_is_a_no_op() {
        let (server, sink) = make_server();
        let delivered = server.damage(WindowId(7), Region::new(0, 0, 10, 10), DamageOptions::default());
        assert!(!delivered);
        assert!(sink.packets.lock().is_empty());
    }

    #[test]
    fn congestion_estimate_is_zero_with_few_samples() {
        let (server, _sink) = make_server();
        assert_eq!(server.congestion_estimate(), 0.0);
    }

    #[test]
    fn remove_window_makes_it_unaddressable() {
        let (server, _sink) = make_server();
        server.add_window(WindowId(2)).unwrap();
        server.remove_window(WindowId(2)).unwrap();
        assert!(server.window(WindowId(2)).is_none());
        let delivered = server.damage(WindowId(2), Region::new(0, 0, 10, 10), DamageOptions::default());
        assert!(!delivered);
    }
}
