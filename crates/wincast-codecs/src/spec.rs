use wincast_types::{HeapImage, Image, PixelFormat};

use crate::error::Result;

/// Quality/speed targets passed to a still encoder. Every still encoder
/// receives both even though most only consume one: jpeg/png read
/// `quality` (and derive their optimize-pass decision from `speed`), rgb24/
/// rgb32 read `speed` alone to pick a zlib level since raw pixels have no
/// quality knob.
#[derive(Debug, Clone, Copy)]
pub struct EncodeParams {
    pub quality: u8,
    pub speed: u8,
}

/// A still-image encoder: takes one frame, produces one compressed payload.
/// No cross-frame state beyond whatever the implementation caches
/// internally (e.g. quantization tables); the delta cache lives above this
/// trait, in `wincast-cache`.
pub trait StillEncoder: Send {
    fn encode(&mut self, image: &dyn Image, params: EncodeParams) -> Result<Vec<u8>>;
}

/// A colour-space converter: RGB family in, one particular output format
/// out (usually a YUV planar format a video encoder accepts). Always
/// produces a freshly-owned [`HeapImage`] - the converter never mutates its
/// input in place, since the caller may still need the source pixels (e.g.
/// the mmap path, or a still-encoder fallback taken after CSC failure).
pub trait CscConverter: Send {
    fn convert(&mut self, image: &dyn Image) -> Result<HeapImage>;
}

/// A streaming video encoder. Stateful across calls - reusing the same
/// instance for consecutive frames of the same window is what makes it a
/// *video* encoder rather than a still one; [`crate::VideoPipeline`] is
/// responsible for tearing it down and rebuilding it when dimensions or
/// format change.
pub trait VideoEncoderImpl: Send {
    fn encode(&mut self, image: &dyn Image, quality: u8, speed: u8) -> Result<Vec<u8>>;
    /// Discards internal state (reference frames, rate control history).
    /// Called before reuse across a format/dimension change that the
    /// pipeline decided didn't warrant a full rebuild.
    fn reset(&mut self);
}

/// Declares a still encoder's cost/quality/speed characteristics so the
/// registry and selector can reason about it without instantiating it.
#[derive(Clone)]
pub struct StillEncoderSpec {
    pub name: &'static str,
    pub accepted_formats: Vec<PixelFormat>,
    pub quality: u8,
    pub speed: u8,
    pub setup_cost: u8,
    pub max_dimensions: Option<(u32, u32)>,
    pub lossless: bool,
    pub construct: fn() -> Box<dyn StillEncoder>,
}

impl StillEncoderSpec {
    #[must_use]
    pub fn can_handle(&self, format: PixelFormat, width: u32, height: u32) -> bool {
        if !self.accepted_formats.contains(&format) {
            return false;
        }
        match self.max_dimensions {
            Some((mw, mh)) => width <= mw && height <= mh,
            None => true,
        }
    }
}

/// Declares a CSC converter's cost/quality/speed characteristics.
#[derive(Clone)]
pub struct CscSpec {
    pub name: &'static str,
    pub input_format: PixelFormat,
    pub output_format: PixelFormat,
    pub quality: u8,
    pub speed: u8,
    pub setup_cost: u8,
    pub max_dimensions: Option<(u32, u32)>,
    pub construct: fn() -> Box<dyn CscConverter>,
}

impl CscSpec {
    #[must_use]
    pub fn can_handle(&self, format: PixelFormat, width: u32, height: u32) -> bool {
        if format != self.input_format {
            return false;
        }
        match self.max_dimensions {
            Some((mw, mh)) => width <= mw && height <= mh,
            None => true,
        }
    }
}

/// Declares a video encoder's cost/quality/speed characteristics and the
/// single CSC output format it accepts as input.
#[derive(Clone)]
pub struct VideoEncoderSpec {
    pub name: &'static str,
    pub accepted_format: PixelFormat,
    pub quality: u8,
    pub speed: u8,
    pub setup_cost: u8,
    pub max_dimensions: Option<(u32, u32)>,
    pub construct: fn() -> Box<dyn VideoEncoderImpl>,
}

impl VideoEncoderSpec {
    #[must_use]
    pub fn can_handle(&self, format: PixelFormat, width: u32, height: u32) -> bool {
        if format != self.accepted_format {
            return false;
        }
        match self.max_dimensions {
            Some((mw, mh)) => width <= mw && height <= mh,
            None => true,
        }
    }
}
