//! The per-window (CSC?, video encoder) pipeline: constructed on demand
//! from a scored [`crate::registry::EncoderRegistry`] candidate set,
//! rebuilt whenever the frame's dimensions or source format stop matching
//! what's live.

use std::sync::Arc;

use tracing::{debug, info, warn};
use wincast_types::{ClientOptions, HeapImage, Image, PixelFormat};

use crate::error::{CodecError, Result};
use crate::registry::{EncoderRegistry, LivePipelineDescriptor, PipelineCandidate};
use crate::spec::{CscConverter, VideoEncoderImpl};

/// A rational downscale factor applied by the CSC stage before encoding.
/// `1:1` is the default and the only value ever used when nothing
/// indicates pressure; the pipeline never upscales and never goes below
/// roughly a tenth of either dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleFactor {
    pub num: u32,
    pub den: u32,
}

impl ScaleFactor {
    pub const IDENTITY: Self = Self { num: 1, den: 1 };

    #[must_use]
    pub fn is_identity(self) -> bool {
        self.num == self.den
    }

    #[must_use]
    pub fn apply(self, value: u32) -> u32 {
        (u64::from(value) * u64::from(self.num) / u64::from(self.den)) as u32
    }
}

/// Picks the scaling factor for this frame: never upscale, default 1:1,
/// downscale under pressure (a large region
/// with low target quality and high target speed, or a fullscreen/
/// maximized window at mid-low quality), never below ~1/10 per dimension
/// (trivially satisfied - the only non-identity factors are 2:3 and 1:2).
#[must_use]
pub fn choose_scale(width: u32, height: u32, target_quality: u8, target_speed: u8, is_fullscreen: bool, is_maximized: bool) -> ScaleFactor {
    let area = u64::from(width) * u64::from(height);
    let large = area > 1_000_000;
    if large && target_quality < 50 && target_speed > 70 {
        ScaleFactor { num: 2, den: 3 }
    } else if (is_fullscreen || is_maximized) && target_quality < 70 {
        ScaleFactor { num: 1, den: 2 }
    } else {
        ScaleFactor::IDENTITY
    }
}

/// Nearest-neighbor resize of a packed RGB-family image. Used only as the
/// pre-CSC downscale step; quality loss here is an accepted tradeoff for
/// bandwidth under pressure.
fn resize_nearest(image: &dyn Image, dst_width: u32, dst_height: u32) -> Result<HeapImage> {
    let stride = image.pixel_format().packed_bytes_per_pixel().ok_or_else(|| CodecError::CscFailed {
        from: image.pixel_format().to_string(),
        to: image.pixel_format().to_string(),
        reason: "scaling only supports packed RGB formats".to_owned(),
    })? as usize;
    let src_width = image.width().max(1);
    let src_height = image.height().max(1);
    let src_rowstride = image.rowstride() as usize;
    let pixels = image.pixels();
    let mut out = vec![0u8; (dst_width as usize) * (dst_height as usize) * stride];
    for y in 0..dst_height {
        let src_y = (u64::from(y) * u64::from(src_height) / u64::from(dst_height)).min(u64::from(src_height - 1)) as usize;
        for x in 0..dst_width {
            let src_x = (u64::from(x) * u64::from(src_width) / u64::from(dst_width)).min(u64::from(src_width - 1)) as usize;
            let src_off = src_y * src_rowstride + src_x * stride;
            let dst_off = (y as usize * dst_width as usize + x as usize) * stride;
            out[dst_off..dst_off + stride].copy_from_slice(&pixels[src_off..src_off + stride]);
        }
    }
    Ok(HeapImage::new(dst_width, dst_height, dst_width * stride as u32, image.pixel_format(), out))
}

/// Inputs the pipeline needs to pick and score a candidate; everything a
/// `WindowSource` already tracks about the window and the controller's
/// current targets.
#[derive(Debug, Clone, Copy)]
pub struct EncodeOptions {
    pub target_quality: u8,
    pub target_speed: u8,
    pub min_quality: u8,
    pub is_fullscreen: bool,
    pub is_maximized: bool,
}

/// What [`VideoPipeline::encode`] hands back: the compressed payload plus
/// enough metadata for the caller to fill in a [`ClientOptions`].
#[derive(Debug, Clone)]
pub struct EncodeOutput {
    pub payload: Vec<u8>,
    pub pixel_format: PixelFormat,
    pub scaled_size: Option<(u16, u16)>,
    pub csc_name: Option<&'static str>,
}

struct Live {
    candidate: PipelineCandidate,
    csc_instance: Option<Box<dyn CscConverter>>,
    encoder_instance: Box<dyn VideoEncoderImpl>,
    src_format: PixelFormat,
    width: u32,
    height: u32,
    scale: ScaleFactor,
}

/// A (CSC?, video encoder) pair built from [`EncoderRegistry`] for one
/// window's current `(src_format, width, height)`, rebuilt whenever those
/// stop matching. All mutation is expected to happen under whatever
/// per-window mutex the caller (`wincast-window`'s `WindowSource`) holds;
/// this type itself has no internal locking - the mutex is held only for
/// the duration of one frame's encode, and it's the caller's mutex, not
/// this struct's.
pub struct VideoPipeline {
    registry: Arc<EncoderRegistry>,
    output_codec: &'static str,
    live: Option<Live>,
}

impl VideoPipeline {
    #[must_use]
    pub fn new(registry: Arc<EncoderRegistry>, output_codec: &'static str) -> Self {
        Self {
            registry,
            output_codec,
            live: None,
        }
    }

    /// True if the live pipeline (if any) can accept a frame of this shape
    /// without rebuilding. A `false` here doesn't rebuild by itself -
    /// [`VideoPipeline::encode`] does that lazily - but callers use it to
    /// decide, e.g., whether `x264 parity` (even dimensions) still holds.
    #[must_use]
    pub fn check(&self, width: u32, height: u32, src_format: PixelFormat) -> bool {
        self.live
            .as_ref()
            .is_some_and(|live| live.width == width && live.height == height && live.src_format == src_format)
    }

    fn live_descriptor(&self) -> Option<LivePipelineDescriptor> {
        self.live.as_ref().map(|live| LivePipelineDescriptor {
            csc_name: live.candidate.csc.as_ref().map(|c| c.name),
            encoder_name: live.candidate.encoder.name,
            width: live.width,
            height: live.height,
        })
    }

    fn rebuild(&mut self, src_format: PixelFormat, width: u32, height: u32, options: &EncodeOptions) -> Result<()> {
        let candidate = self
            .registry
            .best_candidate(
                self.output_codec,
                src_format,
                width,
                height,
                options.target_quality,
                options.target_speed,
                options.min_quality,
                self.live_descriptor(),
            )
            .ok_or_else(|| CodecError::NoCandidate {
                encoding: self.output_codec.to_owned(),
                width,
                height,
            })?;

        let scale = choose_scale(
            width,
            height,
            options.target_quality,
            options.target_speed,
            options.is_fullscreen,
            options.is_maximized,
        );

        let csc_instance = candidate.csc.as_ref().map(|c| (c.construct)());
        let encoder_instance = (candidate.encoder.construct)();

        info!(
            codec = self.output_codec,
            csc = candidate.csc.as_ref().map(|c| c.name),
            encoder = candidate.encoder.name,
            width,
            height,
            ?scale,
            "rebuilding video pipeline"
        );

        self.live = Some(Live {
            candidate,
            csc_instance,
            encoder_instance,
            src_format,
            width,
            height,
            scale,
        });
        Ok(())
    }

    /// Runs CSC (if any) then the video encoder over `image`, rebuilding
    /// the pipeline first if it doesn't already match this frame's shape.
    pub fn encode(&mut self, image: &dyn Image, options: &EncodeOptions) -> Result<EncodeOutput> {
        let width = image.width();
        let height = image.height();
        let src_format = image.pixel_format();
        if !self.check(width, height, src_format) {
            self.rebuild(src_format, width, height, options)?;
        }
        let live = self.live.as_mut().expect("just rebuilt or already live");

        let scaled = if live.scale.is_identity() {
            None
        } else {
            let dst_width = live.scale.apply(width).max(1);
            let dst_height = live.scale.apply(height).max(1);
            Some(resize_nearest(image, dst_width, dst_height)?)
        };
        let working: &dyn Image = scaled.as_ref().map_or(image, |s| s);

        let csc_output = match live.csc_instance.as_mut() {
            Some(csc) => Some(csc.convert(working).map_err(|err| {
                warn!(error = %err, "csc conversion failed");
                err
            })?),
            None => None,
        };
        let encoder_input: &dyn Image = csc_output.as_ref().map_or(working, |c| c);

        let payload = live
            .encoder_instance
            .encode(encoder_input, options.target_quality, options.target_speed)?;

        debug!(bytes = payload.len(), encoder = live.candidate.encoder.name, "video frame encoded");

        #[allow(clippy::cast_possible_truncation)]
        let scaled_size = scaled.as_ref().map(|s| (s.width() as u16, s.height() as u16));

        Ok(EncodeOutput {
            payload,
            pixel_format: encoder_input.pixel_format(),
            scaled_size,
            csc_name: live.candidate.csc.as_ref().map(|c| c.name),
        })
    }

    /// Tears down the live pipeline, forcing the next `encode` call to
    /// rebuild from scratch (and a video key frame with it). Called on
    /// `cancel_damage()` and on compressor failure.
    pub fn teardown(&mut self) {
        if self.live.is_some() {
            debug!("tearing down video pipeline");
        }
        self.live = None;
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.is_some()
    }
}

/// Fills in the wire-level [`ClientOptions`] fields an [`EncodeOutput`]
/// implies, for callers assembling a full `DrawPacket`.
#[must_use]
pub fn client_options_for(output: &EncodeOutput) -> ClientOptions {
    ClientOptions {
        scaled_size: output.scaled_size,
        csc: output.csc_name.map(str::to_owned),
        rgb_format: Some(output.pixel_format.to_string()),
        ..ClientOptions::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::EncoderRegistry;
    use crate::spec::{CscSpec, VideoEncoderSpec};
    use wincast_types::HeapImage;

    struct PassthroughCsc;
    impl CscConverter for PassthroughCsc {
        fn convert(&mut self, image: &dyn Image) -> Result<HeapImage> {
            Ok(HeapImage::new(
                image.width(),
                image.height(),
                image.width(),
                PixelFormat::Yuv420p,
                vec![0u8; (image.width() * image.height() * 3 / 2) as usize],
            ))
        }
    }

    struct CountingEncoder {
        calls: usize,
    }
    impl VideoEncoderImpl for CountingEncoder {
        fn encode(&mut self, _image: &dyn Image, _quality: u8, _speed: u8) -> Result<Vec<u8>> {
            self.calls += 1;
            Ok(vec![self.calls as u8])
        }
        fn reset(&mut self) {
            self.calls = 0;
        }
    }

    fn test_registry() -> Arc<EncoderRegistry> {
        Arc::new(EncoderRegistry::new(
            vec![],
            vec![CscSpec {
                name: "bgrx-yuv420p",
                input_format: PixelFormat::Bgrx,
                output_format: PixelFormat::Yuv420p,
                quality: 90,
                speed: 80,
                setup_cost: 10,
                max_dimensions: None,
                construct: || Box::new(PassthroughCsc),
            }],
            vec![VideoEncoderSpec {
                name: "x264",
                accepted_format: PixelFormat::Yuv420p,
                quality: 70,
                speed: 70,
                setup_cost: 50,
                max_dimensions: None,
                construct: || Box::new(CountingEncoder { calls: 0 }),
            }],
        ))
    }

    fn opts() -> EncodeOptions {
        EncodeOptions {
            target_quality: 70,
            target_speed: 50,
            min_quality: 0,
            is_fullscreen: false,
            is_maximized: false,
        }
    }

    #[test]
    fn encode_builds_pipeline_lazily() {
        let mut pipeline = VideoPipeline::new(test_registry(), "x264");
        assert!(!pipeline.is_live());
        let img = HeapImage::new(16, 16, 64, PixelFormat::Bgrx, vec![10u8; 16 * 16 * 4]);
        let out = pipeline.encode(&img, &opts()).unwrap();
        assert!(pipeline.is_live());
        assert_eq!(out.payload, vec![1]);
    }

    #[test]
    fn dimension_change_rebuilds() {
        let mut pipeline = VideoPipeline::new(test_registry(), "x264");
        let small = HeapImage::new(16, 16, 64, PixelFormat::Bgrx, vec![0u8; 16 * 16 * 4]);
        pipeline.encode(&small, &opts()).unwrap();
        assert!(pipeline.check(16, 16, PixelFormat::Bgrx));
        let big = HeapImage::new(32, 32, 128, PixelFormat::Bgrx, vec![0u8; 32 * 32 * 4]);
        assert!(!pipeline.check(32, 32, PixelFormat::Bgrx));
        pipeline.encode(&big, &opts()).unwrap();
        assert!(pipeline.check(32, 32, PixelFormat::Bgrx));
    }

    #[test]
    fn teardown_forces_rebuild() {
        let mut pipeline = VideoPipeline::new(test_registry(), "x264");
        let img = HeapImage::new(16, 16, 64, PixelFormat::Bgrx, vec![0u8; 16 * 16 * 4]);
        pipeline.encode(&img, &opts()).unwrap();
        pipeline.teardown();
        assert!(!pipeline.is_live());
        assert!(!pipeline.check(16, 16, PixelFormat::Bgrx));
    }

    #[test]
    fn scale_never_upscales() {
        let scale = choose_scale(4_000_000, 1, 10, 99, false, false);
        assert!(scale.num <= scale.den);
    }
}
