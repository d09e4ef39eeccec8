//! The per-window damage state machine: ingress batching, the adaptive
//! encoding decision, auto-refresh, ACK bookkeeping, and packet emission —
//! the piece that wires every other crate in the pipeline together for one
//! window.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use wincast_batch::{Controller, ControllerDecision, ControllerInputs};
use wincast_cache::{DeltaCache, MmapRegion};
use wincast_codecs::{
    client_options_for, is_video_encoding, select, split_for_video, EncodeOptions, EncoderRegistry,
    EncodeParams, EncodingChoice, EncodingPlanItem, SelectorConfig, SelectorContext, VideoPipeline,
};
use wincast_stats::StatsRing;
use wincast_types::{ClientOptions, DamageSequence, DrawPacket, Image, Region, WindowId, WindowTraits};

use crate::config::WindowSourceConfig;
use crate::interfaces::{BoxedCompressJob, ClientCapabilities, DamageQueue, DamageSource, PacketSink, SentCallback};
use crate::scheduler::{Scheduler, TimerId};

/// The window's place in the batching/refresh cycle. Only one
/// [`DelayedRegion`] can exist at a time, which is what keeps this a simple
/// enum instead of a richer state graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowSourceState {
    /// No pending region, no inflight refresh.
    Idle,
    /// A [`DelayedRegion`] is accumulating damage, waiting for its expiry
    /// timer.
    Delayed,
    /// The expiry timer fired but packets already in flight (`ack_records`
    /// non-empty) blocked the send; waiting on acks or the safety timer.
    Sending,
    /// A refresh has been scheduled or is in flight.
    Refreshing,
}

/// Per-call overrides for one `damage()` admission: the batch/delay knobs
/// carried through to the eventual send.
#[derive(Debug, Clone, Default)]
pub struct DamageOptions {
    /// Pins the encoding for this region instead of letting the selector
    /// choose.
    pub override_encoding: Option<String>,
    /// When two admissions land in the same delayed region, the later
    /// options win outright instead of only filling gaps in the earlier
    /// ones.
    pub override_options: bool,
}

struct DelayedRegion {
    first_damage_time: Instant,
    accumulated: Vec<Region>,
    #[allow(dead_code)]
    options: DamageOptions,
    intended_encoding: String,
    latest_sequence: DamageSequence,
    expired: bool,
    timer: TimerId,
    safety_timer: Option<TimerId>,
}

struct AckRecord {
    queued_time: Instant,
    sent_time: Option<Instant>,
    bytes_at_sent: u64,
    pixel_count: u64,
}

struct WindowStats {
    latency_ms: StatsRing<(Instant, f64)>,
}

impl Default for WindowStats {
    fn default() -> Self {
        Self {
            latency_ms: StatsRing::new(128),
        }
    }
}

struct ProcessContext {
    traits: WindowTraits,
    current_encoding: String,
    is_first_frame: bool,
    target_quality: u8,
    target_speed: u8,
    min_quality: u8,
}

struct Inner {
    config: WindowSourceConfig,
    controller: Controller,
    delta_cache: DeltaCache,
    video_pipeline: VideoPipeline,
    current_encoding: String,
    state: WindowSourceState,
    delayed: Option<DelayedRegion>,
    damage_sequence: DamageSequence,
    damage_cancelled: DamageSequence,
    ack_records: HashMap<u32, AckRecord>,
    refresh_timer: Option<TimerId>,
    is_first_frame: bool,
    recent_events: VecDeque<(Instant, u64)>,
    stats: WindowStats,
    encoding_totals: HashMap<String, (u64, u64)>,
    last_recalc: Option<Instant>,
    last_decision: ControllerDecision,
}

/// Every collaborator a [`WindowSource`] needs at construction. Kept as a
/// plain data bag (rather than letting `WindowSource` reach back into a
/// `ServerSource`) so windows and the connection that owns them never form a
/// reference cycle.
pub struct WindowSourceHandles {
    pub damage_source: Arc<dyn DamageSource>,
    pub packet_sink: Arc<dyn PacketSink>,
    pub damage_queue: Arc<dyn DamageQueue>,
    pub scheduler: Arc<dyn Scheduler>,
    pub registry: Arc<EncoderRegistry>,
    /// Shared with every other window on the connection: wire packet
    /// sequence numbers are per-connection, not per-window.
    pub packet_sequence: Arc<AtomicU32>,
    /// `None` when the client never offered an mmap area or it failed to
    /// map; raw-pixel encodings then fall back to ordinary compression.
    pub mmap: Option<Arc<Mutex<MmapRegion>>>,
}

/// The per-window adaptive damage pipeline: batches incoming damage,
/// chooses an encoding, compresses, and hands packets to the
/// [`PacketSink`](crate::PacketSink). Always held behind an `Arc`, since its
/// own callbacks and scheduled timers need to re-enter it.
pub struct WindowSource {
    window: WindowId,
    handles: WindowSourceHandles,
    client_caps: ClientCapabilities,
    inner: Mutex<Inner>,
}

impl WindowSource {
    #[must_use]
    pub fn new(
        window: WindowId,
        handles: WindowSourceHandles,
        client_caps: ClientCapabilities,
        config: WindowSourceConfig,
        video_output_codec: &'static str,
    ) -> Arc<Self> {
        let controller = Controller::new(config.controller.clone());
        let video_pipeline = VideoPipeline::new(Arc::clone(&handles.registry), video_output_codec);
        let start_delay_ms = config.batch.current_delay_ms;
        Arc::new(Self {
            window,
            handles,
            client_caps,
            inner: Mutex::new(Inner {
                config,
                controller,
                delta_cache: DeltaCache::new(),
                video_pipeline,
                current_encoding: "png".to_owned(),
                state: WindowSourceState::Idle,
                delayed: None,
                damage_sequence: DamageSequence::zero(),
                damage_cancelled: DamageSequence::zero(),
                ack_records: HashMap::new(),
                refresh_timer: None,
                is_first_frame: true,
                recent_events: VecDeque::new(),
                stats: WindowStats::default(),
                encoding_totals: HashMap::new(),
                last_recalc: None,
                last_decision: ControllerDecision {
                    quality: 100,
                    speed: 50,
                    delay_ms: start_delay_ms,
                },
            }),
        })
    }

    #[must_use]
    pub fn window(&self) -> WindowId {
        self.window
    }

    #[must_use]
    pub fn state(&self) -> WindowSourceState {
        self.inner.lock().state
    }

    #[must_use]
    pub fn has_delayed_region(&self) -> bool {
        self.inner.lock().delayed.is_some()
    }

    #[must_use]
    pub fn current_encoding(&self) -> String {
        self.inner.lock().current_encoding.clone()
    }

    #[must_use]
    pub fn encoding_totals(&self) -> HashMap<String, (u64, u64)> {
        self.inner.lock().encoding_totals.clone()
    }

    #[must_use]
    pub fn pending_ack_count(&self) -> usize {
        self.inner.lock().ack_records.len()
    }

    /// Admits a newly damaged region. Merges into the single pending
    /// [`DelayedRegion`] if one exists, otherwise decides between an
    /// immediate synchronous dispatch and arming a new batching timer.
    pub fn damage(self: &Arc<Self>, region: Region, options: DamageOptions) {
        if region.width == 0 || region.height == 0 {
            return;
        }

        let now = Instant::now();
        let mut immediate = false;
        let mut damage_seq = DamageSequence::zero();

        {
            let mut inner = self.inner.lock();

            if let Some(id) = inner.refresh_timer.take() {
                self.handles.scheduler.cancel(id);
                if inner.state == WindowSourceState::Refreshing {
                    inner.state = WindowSourceState::Idle;
                }
            }

            inner.damage_sequence = inner.damage_sequence.next();
            damage_seq = inner.damage_sequence;

            inner.recent_events.push_back((now, region.area()));
            let time_unit = Duration::from_secs_f64(inner.config.batch.time_unit_s.max(0.001));
            while let Some((t, _)) = inner.recent_events.front() {
                if now.duration_since(*t) > time_unit {
                    inner.recent_events.pop_front();
                } else {
                    break;
                }
            }

            if let Some(delayed) = inner.delayed.as_mut() {
                delayed.accumulated.push(region);
                delayed.latest_sequence = damage_seq;
                if options.override_options {
                    delayed.options = options;
                } else if delayed.options.override_encoding.is_none() {
                    delayed.options.override_encoding = options.override_encoding.clone();
                }
                return;
            }

            let event_count = u32::try_from(inner.recent_events.len()).unwrap_or(u32::MAX);
            let pixel_volume: u64 = inner.recent_events.iter().map(|(_, p)| *p).sum();
            if inner.config.batch.should_force_batch(event_count, pixel_volume) {
                let event_ratio = f64::from(event_count) / f64::from(inner.config.batch.max_events.max(1));
                let pixel_ratio = pixel_volume as f64 / inner.config.batch.max_pixels.max(1) as f64;
                let ratio = event_ratio.max(pixel_ratio).max(1.0);
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let new_delay = ((f64::from(inner.config.batch.min_delay_ms) * ratio).round() as u32)
                    .clamp(inner.config.batch.min_delay_ms, inner.config.batch.max_delay_ms);
                inner.config.batch.current_delay_ms = new_delay;
            }

            let backlog_empty = inner.ack_records.is_empty();
            let at_floor = inner.config.batch.current_delay_ms <= inner.config.batch.min_delay_ms;
            if at_floor && backlog_empty && !inner.config.batch.always {
                immediate = true;
            } else {
                let delay = Duration::from_millis(u64::from(inner.config.batch.current_delay_ms));
                let this = Arc::clone(self);
                let timer = self.handles.scheduler.schedule_in(delay, Box::new(move || this.on_expiry()));
                let intended_encoding = inner.current_encoding.clone();
                inner.delayed = Some(DelayedRegion {
                    first_damage_time: now,
                    accumulated: vec![region],
                    options,
                    intended_encoding,
                    latest_sequence: damage_seq,
                    expired: false,
                    timer,
                    safety_timer: None,
                });
                inner.state = WindowSourceState::Delayed;
            }
        }

        if immediate {
            self.process_one_region(region, damage_seq, None, false);
        }
    }

    /// Cancels all pending and in-flight work for this window: the delayed
    /// region, any armed timers, the delta cache, and the live video
    /// pipeline. Packets already queued for already-cancelled sequences are
    /// dropped at emission time, except mmap-backed ones (the payload lives
    /// in the shared ring independent of packet delivery order).
    pub fn cancel_damage(self: &Arc<Self>) {
        let mut inner = self.inner.lock();
        inner.damage_cancelled = inner.damage_sequence;
        if let Some(delayed) = inner.delayed.take() {
            self.handles.scheduler.cancel(delayed.timer);
            if let Some(id) = delayed.safety_timer {
                self.handles.scheduler.cancel(id);
            }
        }
        if let Some(id) = inner.refresh_timer.take() {
            self.handles.scheduler.cancel(id);
        }
        inner.delta_cache.invalidate();
        inner.video_pipeline.teardown();
        inner.state = WindowSourceState::Idle;
    }

    /// Reconciles an acknowledged packet: records round-trip latency, or
    /// invalidates the delta cache on a reported decode failure
    /// (`decode_time_us == 0`). Duplicate or unknown sequences are logged
    /// and otherwise ignored. `width`/`height` are part of the viewer ACK
    /// wire shape but aren't needed to locate the `AckRecord`, which is
    /// keyed by `packet_sequence` alone.
    pub fn damage_packet_acked(self: &Arc<Self>, packet_sequence: u32, _width: u32, _height: u32, decode_time_us: u64) {
        let should_retry_flush = {
            let mut inner = self.inner.lock();
            match inner.ack_records.remove(&packet_sequence) {
                Some(record) => {
                    if decode_time_us == 0 {
                        inner.delta_cache.invalidate();
                        warn!(window = ?self.window, packet_sequence, "viewer reported decode failure");
                    } else {
                        #[allow(clippy::cast_precision_loss)]
                        let elapsed_ms = record.queued_time.elapsed().as_secs_f64() * 1000.0;
                        inner.stats.latency_ms.push((Instant::now(), elapsed_ms));
                    }
                }
                None => debug!(window = ?self.window, packet_sequence, "ack for unknown/duplicate packet sequence"),
            }
            inner.state == WindowSourceState::Sending && inner.ack_records.is_empty()
        };
        if should_retry_flush {
            self.try_flush(false);
        }
    }

    fn on_expiry(self: &Arc<Self>) {
        self.try_flush(false);
    }

    /// Flushes the pending [`DelayedRegion`] if the backlog allows it,
    /// otherwise arms (or leaves armed) the `max_delay` safety timer that
    /// forces the send regardless of backlog.
    fn try_flush(self: &Arc<Self>, forced: bool) {
        let flushed = {
            let mut inner = self.inner.lock();
            if inner.delayed.is_none() {
                return;
            }
            let backlog = inner.ack_records.len();
            if !forced && backlog > 0 {
                if let Some(delayed) = inner.delayed.as_mut() {
                    delayed.expired = true;
                }
                inner.state = WindowSourceState::Sending;
                let already_armed = inner.delayed.as_ref().is_some_and(|d| d.safety_timer.is_some());
                if !already_armed {
                    let max_delay = Duration::from_millis(u64::from(inner.config.batch.max_delay_ms));
                    let this = Arc::clone(self);
                    let id = self
                        .handles
                        .scheduler
                        .schedule_in(max_delay, Box::new(move || this.try_flush(true)));
                    if let Some(delayed) = inner.delayed.as_mut() {
                        delayed.safety_timer = Some(id);
                    }
                }
                return;
            }
            if backlog > 0 {
                warn!(window = ?self.window, backlog, "sending delayed region despite backlog above max_delay");
            }
            let delayed = inner.delayed.take().expect("checked Some above");
            self.handles.scheduler.cancel(delayed.timer);
            if let Some(id) = delayed.safety_timer {
                self.handles.scheduler.cancel(id);
            }
            #[allow(clippy::cast_possible_truncation)]
            let applied_delay_ms = Instant::now()
                .saturating_duration_since(delayed.first_damage_time)
                .as_millis()
                .min(u128::from(u32::MAX)) as u32;
            inner.config.batch.record_applied_delay(applied_delay_ms);
            inner.state = WindowSourceState::Idle;
            delayed
        };
        self.emit_flushed_regions(flushed.accumulated, flushed.latest_sequence, &flushed.intended_encoding);
    }

    /// Decides whether the accumulated rectangles ship individually or get
    /// promoted to a single full-window region, per the emit policy: more
    /// than 60 rects, near-total pixel coverage, or a video-bound send
    /// always goes full-window.
    fn emit_flushed_regions(self: &Arc<Self>, regions: Vec<Region>, damage_seq: DamageSequence, intended_encoding: &str) {
        let (window_width, window_height) = self.handles.damage_source.window_dimensions(self.window).unwrap_or((0, 0));
        let window_area = u64::from(window_width) * u64::from(window_height);
        let count = u64::try_from(regions.len()).unwrap_or(u64::MAX);
        let pixels: u64 = regions.iter().map(Region::area).sum();
        let promote_full = regions.len() > 60
            || (window_area > 0 && pixels + 1024 * count >= window_area * 9 / 10)
            || is_video_encoding(intended_encoding);

        let final_regions = if promote_full && window_width > 0 && window_height > 0 {
            vec![Region::new(0, 0, window_width, window_height)]
        } else {
            regions
        };
        self.enqueue_compress(final_regions, damage_seq);
    }

    fn enqueue_compress(self: &Arc<Self>, regions: Vec<Region>, damage_seq: DamageSequence) {
        let this = Arc::clone(self);
        self.handles.damage_queue.queue_damage(Box::new(move || {
            for region in regions {
                this.process_one_region(region, damage_seq, None, true);
            }
        }));
    }

    /// Runs the full select → fetch pixels → encode → emit pipeline for one
    /// region. `batching` tells the selector whether this send is part of a
    /// batched flush (as opposed to an immediate dispatch or a refresh).
    fn process_one_region(
        self: &Arc<Self>,
        region: Region,
        damage_seq: DamageSequence,
        quality_speed_override: Option<(u8, u8)>,
        batching: bool,
    ) {
        if !self.handles.damage_source.is_managed(self.window) {
            return;
        }
        self.handles.damage_source.acknowledge_changes(self.window);
        let Some(traits) = self.handles.damage_source.window_traits(self.window) else {
            return;
        };
        let Some((window_width, window_height)) = self.handles.damage_source.window_dimensions(self.window) else {
            return;
        };

        let ctx = {
            let mut inner = self.inner.lock();
            let now = Instant::now();
            if inner.last_recalc.map_or(true, |t| now.duration_since(t) >= Duration::from_millis(40)) {
                let latency_samples = inner.stats.latency_ms.snapshot();
                let backlog_depth = u32::try_from(inner.ack_records.len()).unwrap_or(u32::MAX);
                let inputs = ControllerInputs {
                    latency_samples_ms: &latency_samples,
                    backlog_depth,
                    congestion: 0.0,
                };
                let decision = inner.controller.recalculate(now, &inputs, &mut inner.config.batch);
                inner.last_decision = decision;
                inner.last_recalc = Some(now);
            }
            let decision = inner.last_decision;
            let (target_quality, target_speed) = quality_speed_override.unwrap_or((decision.quality, decision.speed));
            ProcessContext {
                traits,
                current_encoding: inner.current_encoding.clone(),
                is_first_frame: inner.is_first_frame,
                target_quality,
                target_speed,
                min_quality: inner.config.controller.min_quality,
            }
        };

        let selector_cfg = SelectorConfig::default();
        let current_encoding_has_alpha = matches!(ctx.current_encoding.as_str(), "png" | "rgb32" | "webp");
        let sctx = SelectorContext {
            traits: ctx.traits,
            region,
            window_width,
            window_height,
            current_encoding: &ctx.current_encoding,
            image_has_alpha: ctx.traits.has_alpha,
            current_encoding_has_alpha,
            is_first_frame: ctx.is_first_frame,
            batching,
        };
        let choice = select(&sctx, &selector_cfg);
        let plan = match choice {
            EncodingChoice::Video => split_for_video(region, selector_cfg.lossless_still),
            still @ EncodingChoice::Still(_) => vec![EncodingPlanItem { region, choice: still }],
        };

        for item in plan {
            let Some(image) = self.handles.damage_source.get_rgb_rawdata(self.window, item.region) else {
                continue;
            };
            self.emit_one(item, image, damage_seq, &ctx, window_width, window_height);
        }

        self.inner.lock().is_first_frame = false;
    }

    #[allow(clippy::too_many_lines)]
    fn emit_one(
        self: &Arc<Self>,
        item: EncodingPlanItem<'_>,
        image: Box<dyn Image>,
        damage_seq: DamageSequence,
        ctx: &ProcessContext,
        window_width: u32,
        window_height: u32,
    ) {
        let region = item.region;
        let mut client_options = ClientOptions::default();
        let mut mmap_chunks: Vec<(u64, u64)> = Vec::new();
        let mut used_mmap = false;

        let (encoding_name, payload) = match item.choice {
            EncodingChoice::Video => {
                let options = EncodeOptions {
                    target_quality: ctx.target_quality,
                    target_speed: ctx.target_speed,
                    min_quality: ctx.min_quality,
                    is_fullscreen: ctx.traits.is_fullscreen,
                    is_maximized: ctx.traits.is_maximized,
                };
                let result = {
                    let mut inner = self.inner.lock();
                    inner.video_pipeline.encode(image.as_ref(), &options)
                };
                match result {
                    Ok(out) => {
                        client_options = client_options_for(&out);
                        client_options.quality = Some(ctx.target_quality);
                        ("x264".to_owned(), out.payload)
                    }
                    Err(err) => {
                        error!(window = ?self.window, error = %err, "video encoder failed, tearing down pipeline");
                        {
                            let mut inner = self.inner.lock();
                            inner.video_pipeline.teardown();
                            inner.delta_cache.invalidate();
                        }
                        match self.fallback_still(image.as_ref(), ctx.target_speed) {
                            Some(result) => result,
                            None => return,
                        }
                    }
                }
            }
            EncodingChoice::Still(name) => {
                let is_raw = name == "rgb24" || name == "rgb32";
                if is_raw && self.client_caps.mmap {
                    if let Some(mmap) = &self.handles.mmap {
                        let mut guard = mmap.lock();
                        match guard.write(image.pixels()) {
                            Ok(chunks) => {
                                mmap_chunks = chunks;
                                used_mmap = true;
                            }
                            Err(err) => {
                                warn!(error = %err, "mmap overrun, falling back to normal encoding");
                            }
                        }
                    }
                }
                if used_mmap {
                    (name.to_owned(), Vec::new())
                } else {
                    match self.encode_still(name, image.as_ref(), ctx.target_quality, ctx.target_speed) {
                        Some((mut payload, lossless)) => {
                            if !lossless {
                                client_options.quality = Some(ctx.target_quality);
                            }
                            if self.client_caps.supports_delta_for(name) {
                                let mut inner = self.inner.lock();
                                let previous_store_sequence = inner.delta_cache.current().map(|e| e.sequence);
                                let current_pixels = payload.clone();
                                if let Some(delta) = inner.delta_cache.try_delta(region.width, region.height, name, &payload) {
                                    #[allow(clippy::cast_possible_truncation)]
                                    {
                                        client_options.delta = previous_store_sequence.map(|s| s as u32);
                                    }
                                    payload = delta;
                                }
                                #[allow(clippy::cast_possible_truncation)]
                                let store_seq = damage_seq.get() as u32;
                                inner
                                    .delta_cache
                                    .store(region.width, region.height, name, damage_seq.get(), current_pixels);
                                client_options.store = Some(store_seq);
                            }
                            (name.to_owned(), payload)
                        }
                        None => {
                            self.inner.lock().delta_cache.invalidate();
                            return;
                        }
                    }
                }
            }
        };

        if !used_mmap && damage_seq <= self.inner.lock().damage_cancelled {
            debug!(window = ?self.window, sequence = damage_seq.get(), "dropping packet for cancelled damage sequence");
            return;
        }

        let rowstride = if matches!(item.choice, EncodingChoice::Video) {
            0
        } else {
            image.rowstride()
        };
        let packet_sequence = self.handles.packet_sequence.fetch_add(1, Ordering::SeqCst);
        let pixel_count = region.area();
        let packet = DrawPacket {
            window: self.window,
            region,
            encoding: encoding_name.clone(),
            payload,
            packet_sequence,
            rowstride,
            client_options: client_options.clone(),
            mmap_chunks,
        };

        {
            let mut inner = self.inner.lock();
            inner.ack_records.insert(
                packet_sequence,
                AckRecord {
                    queued_time: Instant::now(),
                    sent_time: None,
                    bytes_at_sent: 0,
                    pixel_count,
                },
            );
            inner.current_encoding = encoding_name.clone();
            let totals = inner.encoding_totals.entry(encoding_name).or_insert((0, 0));
            totals.0 += 1;
            totals.1 += pixel_count;
        }

        let sent_self = Arc::clone(self);
        let sent_cb: SentCallback = Box::new(move |bytes| {
            let mut inner = sent_self.inner.lock();
            if let Some(record) = inner.ack_records.get_mut(&packet_sequence) {
                record.sent_time = Some(Instant::now());
                record.bytes_at_sent = bytes;
            }
        });
        let start_cb: SentCallback = Box::new(|_bytes| {});
        self.handles.packet_sink.queue_packet(packet, start_cb, sent_cb);

        if let Some(quality) = client_options.quality {
            let full_coverage = region.width == window_width && region.height == window_height;
            let threshold = self.inner.lock().config.auto_refresh_threshold;
            if quality < threshold || !full_coverage {
                self.schedule_refresh();
            }
        }
    }

    fn encode_still(&self, name: &str, image: &dyn Image, quality: u8, speed: u8) -> Option<(Vec<u8>, bool)> {
        let Some(spec) = self.handles.registry.still_encoders().iter().find(|s| s.name == name) else {
            warn!(encoding = name, "selected still encoder not present in registry");
            return None;
        };
        let lossless = spec.lossless;
        let mut encoder = (spec.construct)();
        match encoder.encode(image, EncodeParams { quality, speed }) {
            Ok(payload) => Some((payload, lossless)),
            Err(err) => {
                error!(encoding = name, error = %err, "still encoder failed; dropping frame");
                None
            }
        }
    }

    fn fallback_still(&self, image: &dyn Image, target_speed: u8) -> Option<(String, Vec<u8>)> {
        let spec = self.handles.registry.fallback_lossless_still(image.pixel_format())?;
        let mut encoder = (spec.construct)();
        match encoder.encode(
            image,
            EncodeParams {
                quality: 100,
                speed: target_speed,
            },
        ) {
            Ok(payload) => Some((spec.name.to_owned(), payload)),
            Err(err) => {
                error!(error = %err, "fallback lossless still encode failed; dropping frame");
                None
            }
        }
    }

    /// Arms (replacing any existing) the auto-refresh timer at
    /// `refresh_delay_ms(current_delay)`.
    fn schedule_refresh(self: &Arc<Self>) {
        let mut inner = self.inner.lock();
        if let Some(id) = inner.refresh_timer.take() {
            self.handles.scheduler.cancel(id);
        }
        let delay_ms = inner.config.refresh_delay_ms(inner.config.batch.current_delay_ms);
        inner.state = WindowSourceState::Refreshing;
        let this = Arc::clone(self);
        let id = self
            .handles
            .scheduler
            .schedule_in(Duration::from_millis(u64::from(delay_ms)), Box::new(move || this.on_refresh_fire()));
        inner.refresh_timer = Some(id);
    }

    /// Fires a pinned-quality full-window send unless new damage superseded
    /// the refresh in the meantime.
    fn on_refresh_fire(self: &Arc<Self>) {
        let should_refresh = {
            let mut inner = self.inner.lock();
            inner.refresh_timer = None;
            if inner.state == WindowSourceState::Refreshing {
                inner.state = WindowSourceState::Idle;
            }
            inner.delayed.is_none()
        };
        if !should_refresh || !self.handles.damage_source.is_managed(self.window) {
            return;
        }
        let Some((w, h)) = self.handles.damage_source.window_dimensions(self.window) else {
            return;
        };
        if w == 0 || h == 0 {
            return;
        }
        let (quality, speed, pinned_encoding) = {
            let inner = self.inner.lock();
            (
                inner.config.auto_refresh_quality,
                inner.config.auto_refresh_speed,
                inner.config.auto_refresh_encoding.clone(),
            )
        };
        if let Some(encoding) = pinned_encoding {
            self.inner.lock().current_encoding = encoding;
        }
        let seq = {
            let mut inner = self.inner.lock();
            inner.damage_sequence = inner.damage_sequence.next();
            inner.damage_sequence
        };
        self.process_one_region(Region::new(0, 0, w, h), seq, Some((quality, speed)), false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WindowSourceConfigBuilder;
    use crate::scheduler::ManualScheduler;
    use std::sync::atomic::AtomicBool;
    use wincast_codecs::EncoderRegistry;
    use wincast_types::{HeapImage, PixelFormat, WindowId};

    struct FakeSource {
        traits: WindowTraits,
        dims: (u32, u32),
        managed: AtomicBool,
        pixel_format: PixelFormat,
    }

    impl Default for FakeSource {
        fn default() -> Self {
            Self {
                traits: WindowTraits::default(),
                dims: (640, 480),
                managed: AtomicBool::new(true),
                pixel_format: PixelFormat::Rgba,
            }
        }
    }

    impl DamageSource for FakeSource {
        fn acknowledge_changes(&self, _window: WindowId) {}

        fn get_rgb_rawdata(&self, _window: WindowId, region: Region) -> Option<Box<dyn Image>> {
            let bpp = self.pixel_format.packed_bytes_per_pixel().unwrap_or(4);
            let len = (region.width * bpp * region.height) as usize;
            Some(Box::new(HeapImage::new(
                region.width,
                region.height,
                region.width * bpp,
                self.pixel_format,
                vec![0u8; len],
            )))
        }

        fn window_traits(&self, _window: WindowId) -> Option<WindowTraits> {
            Some(self.traits)
        }

        fn window_dimensions(&self, _window: WindowId) -> Option<(u32, u32)> {
            Some(self.dims)
        }

        fn is_managed(&self, _window: WindowId) -> bool {
            self.managed.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        packets: Mutex<Vec<DrawPacket>>,
    }

    impl PacketSink for RecordingSink {
        fn queue_packet(&self, packet: DrawPacket, start_send: SentCallback, sent: SentCallback) {
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

    fn make_window(
        source: FakeSource,
        config: WindowSourceConfig,
        client_caps: ClientCapabilities,
    ) -> (Arc<WindowSource>, Arc<RecordingSink>, Arc<ManualScheduler>) {
        let sink = Arc::new(RecordingSink::default());
        let scheduler = Arc::new(ManualScheduler::default());
        let handles = WindowSourceHandles {
            damage_source: Arc::new(source),
            packet_sink: Arc::clone(&sink) as Arc<dyn PacketSink>,
            damage_queue: Arc::new(SyncQueue),
            scheduler: Arc::clone(&scheduler) as Arc<dyn Scheduler>,
            registry: Arc::new(EncoderRegistry::with_defaults()),
            packet_sequence: Arc::new(AtomicU32::new(1)),
            mmap: Some(Arc::new(Mutex::new(MmapRegion::in_memory(1024 * 1024)))),
        };
        let window = WindowSource::new(WindowId(1), handles, client_caps, config, "x264");
        (window, sink, scheduler)
    }

    fn floor_delay_config() -> WindowSourceConfig {
        WindowSourceConfigBuilder::default()
            .batch(|b| b.min_delay_ms(5).start_delay_ms(5))
            .build()
            .build_validated()
            .expect("valid config")
    }

    #[test]
    fn immediate_dispatch_emits_synchronously_at_floor_delay() {
        let (window, sink, _scheduler) = make_window(FakeSource::default(), floor_delay_config(), ClientCapabilities::default());
        window.damage(Region::new(0, 0, 100, 100), DamageOptions::default());
        assert_eq!(sink.packets.lock().len(), 1);
        assert_eq!(window.state(), WindowSourceState::Idle);
    }

    #[test]
    fn packet_sequence_is_monotonic_across_sends() {
        let (window, sink, _scheduler) = make_window(FakeSource::default(), floor_delay_config(), ClientCapabilities::default());
        window.damage(Region::new(0, 0, 10, 10), DamageOptions::default());
        window.damage(Region::new(10, 10, 10, 10), DamageOptions::default());
        let packets = sink.packets.lock();
        assert_eq!(packets.len(), 2);
        assert!(packets[1].packet_sequence > packets[0].packet_sequence);
    }

    #[test]
    fn at_most_one_delayed_region_accumulates_multiple_events() {
        let (window, sink, scheduler) = make_window(FakeSource::default(), WindowSourceConfig::default(), ClientCapabilities::default());
        window.damage(Region::new(0, 0, 10, 10), DamageOptions::default());
        window.damage(Region::new(20, 20, 10, 10), DamageOptions::default());
        assert!(window.has_delayed_region());
        assert!(sink.packets.lock().is_empty());
        assert_eq!(scheduler.pending_count(), 1);
    }

    #[test]
    fn expiry_fires_and_flushes_delayed_region() {
        let (window, sink, scheduler) = make_window(FakeSource::default(), WindowSourceConfig::default(), ClientCapabilities::default());
        window.damage(Region::new(0, 0, 10, 10), DamageOptions::default());
        assert_eq!(scheduler.pending_count(), 1);
        scheduler.fire_all();
        assert_eq!(sink.packets.lock().len(), 1);
        assert!(!window.has_delayed_region());
    }

    #[test]
    fn large_rect_count_is_promoted_to_full_window() {
        let (window, sink, scheduler) = make_window(FakeSource::default(), WindowSourceConfig::default(), ClientCapabilities::default());
        for i in 0..80u32 {
            window.damage(Region::new(i, i, 1, 1), DamageOptions::default());
        }
        scheduler.fire_all();
        let packets = sink.packets.lock();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].region, Region::new(0, 0, 640, 480));
    }

    #[test]
    fn cancel_damage_drops_still_pending_pipeline_state() {
        let (window, sink, scheduler) = make_window(FakeSource::default(), WindowSourceConfig::default(), ClientCapabilities::default());
        window.damage(Region::new(0, 0, 10, 10), DamageOptions::default());
        window.cancel_damage();
        assert!(!window.has_delayed_region());
        scheduler.fire_all();
        assert!(sink.packets.lock().is_empty());
    }

    #[test]
    fn cancelled_non_mmap_packet_is_dropped() {
        let (window, sink, _scheduler) = make_window(FakeSource::default(), floor_delay_config(), ClientCapabilities::default());
        window.cancel_damage();
        window.process_one_region(Region::new(0, 0, 8, 8), DamageSequence::zero(), None, false);
        assert!(sink.packets.lock().is_empty());
    }

    #[test]
    fn cancelled_mmap_packet_is_still_emitted() {
        let caps = ClientCapabilities {
            mmap: true,
            ..ClientCapabilities::default()
        };
        let (window, sink, _scheduler) = make_window(FakeSource::default(), floor_delay_config(), caps);
        {
            let mut inner = window.inner.lock();
            inner.current_encoding = "rgb24".to_owned();
        }
        window.cancel_damage();
        window.process_one_region(Region::new(0, 0, 8, 8), DamageSequence::zero(), None, false);
        let packets = sink.packets.lock();
        assert_eq!(packets.len(), 1);
        assert!(!packets[0].mmap_chunks.is_empty());
        assert!(packets[0].payload.is_empty());
    }

    #[test]
    fn ack_is_removed_exactly_once() {
        let (window, sink, _scheduler) = make_window(FakeSource::default(), floor_delay_config(), ClientCapabilities::default());
        window.damage(Region::new(0, 0, 10, 10), DamageOptions::default());
        let sequence = sink.packets.lock()[0].packet_sequence;
        assert_eq!(window.pending_ack_count(), 1);
        window.damage_packet_acked(sequence, 10, 10, 1500);
        assert_eq!(window.pending_ack_count(), 0);
        window.damage_packet_acked(sequence, 10, 10, 1500);
        assert_eq!(window.pending_ack_count(), 0);
    }

    #[test]
    fn lossy_send_below_threshold_schedules_refresh() {
        let config = WindowSourceConfigBuilder::default()
            .batch(|b| b.min_delay_ms(5).start_delay_ms(5))
            .auto_refresh_threshold(90)
            .build()
            .build_validated()
            .expect("valid config");
        let (window, _sink, scheduler) = make_window(FakeSource::default(), config, ClientCapabilities::default());
        {
            let mut inner = window.inner.lock();
            inner.current_encoding = "jpeg".to_owned();
            inner.last_decision = ControllerDecision {
                quality: 40,
                speed: 50,
                delay_ms: 5,
            };
        }
        window.damage(Region::new(0, 0, 640, 480), DamageOptions::default());
        assert_eq!(scheduler.pending_count(), 1);
    }

    #[test]
    fn refresh_timer_is_cancelled_by_new_damage() {
        let config = WindowSourceConfigBuilder::default()
            .batch(|b| b.min_delay_ms(5).start_delay_ms(5))
            .build()
            .build_validated()
            .expect("valid config");
        let (window, _sink, scheduler) = make_window(FakeSource::default(), config, ClientCapabilities::default());
        {
            let mut inner = window.inner.lock();
            inner.current_encoding = "jpeg".to_owned();
            inner.last_decision = ControllerDecision {
                quality: 40,
                speed: 50,
                delay_ms: 5,
            };
        }
        window.damage(Region::new(0, 0, 640, 480), DamageOptions::default());
        assert_eq!(scheduler.pending_count(), 1);
        window.damage(Region::new(0, 0, 10, 10), DamageOptions::default());
        // the refresh timer is cancelled and a new batch timer (or immediate
        // send) takes its place; either way the stale refresh never fires.
        assert!(window.state() != WindowSourceState::Refreshing || scheduler.pending_count() >= 1);
    }
}
