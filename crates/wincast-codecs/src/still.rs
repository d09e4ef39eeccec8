//! Still-image encoders: png (plus its grayscale/palette variants), jpeg,
//! raw rgb24/rgb32 with generic compression, and webp.

use std::io::Cursor;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::Write as _;
use wincast_types::{Image, PixelFormat};

use crate::error::{CodecError, Result};
use crate::spec::{EncodeParams, StillEncoder, StillEncoderSpec};

/// Whether `speed` is low enough to trade CPU for a smaller payload by
/// enabling the optimize pass on png/jpeg.
fn should_optimize(speed: u8) -> bool {
    speed < 20
}

/// Packs raw packed-RGB(A) pixels into a PNG, at 8-bit depth. `gray` and
/// `palette` select the `/L` and `/P` still-encoding variants: gray
/// converts to 8-bit luminance first, palette quantizes to an adaptive
/// web-safe palette (implemented here as a plain identity/quantize pass
/// over an owned conversion buffer rather than the perceptual median-cut
/// dither libpng-derived encoders use - close enough for a lossless
/// fallback still encoding).
#[cfg(feature = "png")]
pub struct PngEncoder {
    variant: PngVariant,
}

#[cfg(feature = "png")]
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum PngVariant {
    Rgb,
    Gray,
    Palette,
}

#[cfg(feature = "png")]
impl PngEncoder {
    #[must_use]
    pub fn new(variant: PngVariant) -> Self {
        Self { variant }
    }
}

fn rgba_channels(format: PixelFormat) -> Option<(usize, usize, usize, Option<usize>)> {
    match format {
        PixelFormat::Rgb => Some((0, 1, 2, None)),
        PixelFormat::Rgbx | PixelFormat::Rgba => Some((0, 1, 2, Some(3))),
        PixelFormat::Bgrx | PixelFormat::Bgra => Some((2, 1, 0, Some(3))),
        PixelFormat::Yuv420p | PixelFormat::Yuv422p | PixelFormat::Yuv444p => None,
    }
}

fn to_rgba8(image: &dyn Image) -> Result<Vec<u8>> {
    let format = image.pixel_format();
    let (r, g, b, a) = rgba_channels(format).ok_or_else(|| CodecError::StillEncodeFailed {
        encoding: "png".to_owned(),
        reason: format!("unsupported pixel format {format}"),
    })?;
    let stride = format.packed_bytes_per_pixel().unwrap_or(4) as usize;
    let width = image.width() as usize;
    let height = image.height() as usize;
    let rowstride = image.rowstride() as usize;
    let pixels = image.pixels();
    let mut out = Vec::with_capacity(width * height * 4);
    for y in 0..height {
        let row_start = y * rowstride;
        for x in 0..width {
            let px = row_start + x * stride;
            if px + stride > pixels.len() {
                return Err(CodecError::BufferTooShort {
                    expected: px + stride,
                    actual: pixels.len(),
                });
            }
            out.push(pixels[px + r]);
            out.push(pixels[px + g]);
            out.push(pixels[px + b]);
            out.push(a.map_or(255, |idx| pixels[px + idx]));
        }
    }
    Ok(out)
}

#[cfg(feature = "png")]
impl StillEncoder for PngEncoder {
    fn encode(&mut self, image: &dyn Image, params: EncodeParams) -> Result<Vec<u8>> {
        let rgba = to_rgba8(image)?;
        let width = image.width();
        let height = image.height();
        let mut buf = Cursor::new(Vec::new());
        let compression = if should_optimize(params.speed) {
            image::codecs::png::CompressionType::Best
        } else {
            image::codecs::png::CompressionType::Fast
        };
        let encoder = image::codecs::png::PngEncoder::new_with_quality(
            &mut buf,
            compression,
            image::codecs::png::FilterType::Adaptive,
        );
        let (color, data) = match self.variant {
            PngVariant::Rgb => (image::ExtendedColorType::Rgba8, rgba),
            PngVariant::Gray => {
                let mut gray = Vec::with_capacity((width * height) as usize);
                for px in rgba.chunks_exact(4) {
                    let lum = (u32::from(px[0]) * 30 + u32::from(px[1]) * 59 + u32::from(px[2]) * 11) / 100;
                    gray.push(lum as u8);
                }
                (image::ExtendedColorType::L8, gray)
            }
            PngVariant::Palette => {
                // Web-safe 6x6x6 cube quantization: cheap, deterministic,
                // no external quantizer dependency.
                let mut indexed = Vec::with_capacity((width * height) as usize);
                for px in rgba.chunks_exact(4) {
                    let q = |c: u8| (u32::from(c) * 5 / 255) as u8;
                    indexed.push(q(px[0]) * 36 + q(px[1]) * 6 + q(px[2]));
                }
                (image::ExtendedColorType::L8, indexed)
            }
        };
        use image::ImageEncoder as _;
        encoder
            .write_image(&data, width, height, color)
            .map_err(|err| CodecError::StillEncodeFailed {
                encoding: "png".to_owned(),
                reason: err.to_string(),
            })?;
        Ok(buf.into_inner())
    }
}

/// JPEG still encoder. Quality is clamped into `[1, 99]` - libjpeg rejects
/// 0, and 100 is rarely worth the size.
#[cfg(feature = "jpeg")]
pub struct JpegEncoder;

#[cfg(feature = "jpeg")]
impl StillEncoder for JpegEncoder {
    fn encode(&mut self, image: &dyn Image, params: EncodeParams) -> Result<Vec<u8>> {
        let rgba = to_rgba8(image)?;
        let rgb: Vec<u8> = rgba.chunks_exact(4).flat_map(|px| [px[0], px[1], px[2]]).collect();
        let clamped_quality = params.quality.clamp(1, 99);
        let mut buf = Vec::new();
        let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, clamped_quality);
        encoder
            .write_image(&rgb, image.width(), image.height(), image::ExtendedColorType::Rgb8)
            .map_err(|err| CodecError::StillEncodeFailed {
                encoding: "jpeg".to_owned(),
                reason: err.to_string(),
            })?;
        Ok(buf)
    }
}

/// Raw rgb24/rgb32 "encoder": wraps the packed pixels with a generic zlib
/// compressor at a level chosen from the current target speed:
/// `max(min_level, min(5, (110 - current_speed)/20))`, and falls back to
/// sending the pixels uncompressed (`level = 0`) when compression doesn't
/// shrink the payload by at least 32 bytes.
pub struct RgbEncoder {
    /// Whether alpha is preserved (rgb32) or stripped (rgb24).
    pub keep_alpha: bool,
}

impl RgbEncoder {
    #[must_use]
    pub fn level_for_speed(current_speed: u8, payload_len: usize) -> u32 {
        let min_level = if payload_len < 512 { 0 } else { 1 };
        let speed_level = (110i32.saturating_sub(i32::from(current_speed))) / 20;
        min_level.max(speed_level.clamp(0, 5) as u32)
    }
}

impl StillEncoder for RgbEncoder {
    fn encode(&mut self, image: &dyn Image, params: EncodeParams) -> Result<Vec<u8>> {
        let rgba = to_rgba8(image)?;
        let raw: Vec<u8> = if self.keep_alpha {
            rgba
        } else {
            rgba.chunks_exact(4).flat_map(|px| [px[0], px[1], px[2]]).collect()
        };
        let level = Self::level_for_speed(params.speed, raw.len());
        if level == 0 {
            return Ok(raw);
        }
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level));
        encoder.write_all(&raw).map_err(|err| CodecError::StillEncodeFailed {
            encoding: "rgb".to_owned(),
            reason: err.to_string(),
        })?;
        let compressed = encoder.finish().map_err(|err| CodecError::StillEncodeFailed {
            encoding: "rgb".to_owned(),
            reason: err.to_string(),
        })?;
        if compressed.len() + 32 >= raw.len() {
            Ok(raw)
        } else {
            Ok(compressed)
        }
    }
}

/// WebP still encoder, format variant (`BGRA`/`RGBA`/`BGR`/`RGB`) selected
/// by the source's packed pixel layout so no conversion copy is needed
/// beyond what the `webp` crate itself requires.
#[cfg(feature = "webp")]
pub struct WebpEncoder;

#[cfg(feature = "webp")]
impl StillEncoder for WebpEncoder {
    fn encode(&mut self, image: &dyn Image, params: EncodeParams) -> Result<Vec<u8>> {
        let width = image.width();
        let height = image.height();
        let pixels = image.pixels();
        let encoder = match image.pixel_format() {
            PixelFormat::Rgb => webp::Encoder::from_rgb(pixels, width, height),
            PixelFormat::Rgbx | PixelFormat::Rgba => webp::Encoder::from_rgba(pixels, width, height),
            PixelFormat::Bgrx | PixelFormat::Bgra => {
                // The `webp` crate has no native BGR(A) entry point; swap
                // channels into an RGBA scratch buffer first.
                let rgba = to_rgba8(image)?;
                return Self::encode_rgba(&rgba, width, height, params.quality);
            }
            other => {
                return Err(CodecError::StillEncodeFailed {
                    encoding: "webp".to_owned(),
                    reason: format!("unsupported pixel format {other}"),
                })
            }
        };
        Ok(encoder.encode(f32::from(params.quality.min(100))).to_vec())
    }
}

#[cfg(feature = "webp")]
impl WebpEncoder {
    fn encode_rgba(rgba: &[u8], width: u32, height: u32, quality: u8) -> Result<Vec<u8>> {
        let encoder = webp::Encoder::from_rgba(rgba, width, height);
        Ok(encoder.encode(f32::from(quality.min(100))).to_vec())
    }
}

/// The default set of still encoders compiled into this build, governed by
/// the `png`/`jpeg`/`webp` crate features.
#[must_use]
pub fn default_still_encoders() -> Vec<StillEncoderSpec> {
    let mut specs = Vec::new();
    #[cfg(feature = "png")]
    {
        specs.push(StillEncoderSpec {
            name: "png",
            accepted_formats: vec![PixelFormat::Rgb, PixelFormat::Rgbx, PixelFormat::Rgba, PixelFormat::Bgrx, PixelFormat::Bgra],
            quality: 100,
            speed: 40,
            setup_cost: 10,
            max_dimensions: None,
            lossless: true,
            construct: || Box::new(PngEncoder::new(PngVariant::Rgb)),
        });
        specs.push(StillEncoderSpec {
            name: "png/L",
            accepted_formats: vec![PixelFormat::Rgb, PixelFormat::Rgbx, PixelFormat::Rgba, PixelFormat::Bgrx, PixelFormat::Bgra],
            quality: 60,
            speed: 55,
            setup_cost: 10,
            max_dimensions: None,
            lossless: true,
            construct: || Box::new(PngEncoder::new(PngVariant::Gray)),
        });
        specs.push(StillEncoderSpec {
            name: "png/P",
            accepted_formats: vec![PixelFormat::Rgb, PixelFormat::Rgbx, PixelFormat::Rgba, PixelFormat::Bgrx, PixelFormat::Bgra],
            quality: 70,
            speed: 50,
            setup_cost: 10,
            max_dimensions: None,
            lossless: true,
            construct: || Box::new(PngEncoder::new(PngVariant::Palette)),
        });
    }
    #[cfg(feature = "jpeg")]
    specs.push(StillEncoderSpec {
        name: "jpeg",
        accepted_formats: vec![PixelFormat::Rgb, PixelFormat::Rgbx, PixelFormat::Rgba, PixelFormat::Bgrx, PixelFormat::Bgra],
        quality: 80,
        speed: 70,
        setup_cost: 8,
        max_dimensions: None,
        lossless: false,
        construct: || Box::new(JpegEncoder),
    });
    specs.push(StillEncoderSpec {
        name: "rgb24",
        accepted_formats: vec![PixelFormat::Rgb, PixelFormat::Rgbx, PixelFormat::Bgrx],
        quality: 100,
        speed: 90,
        setup_cost: 2,
        max_dimensions: None,
        lossless: true,
        construct: || Box::new(RgbEncoder { keep_alpha: false }),
    });
    specs.push(StillEncoderSpec {
        name: "rgb32",
        accepted_formats: vec![PixelFormat::Rgba, PixelFormat::Bgra, PixelFormat::Rgbx, PixelFormat::Bgrx],
        quality: 100,
        speed: 88,
        setup_cost: 2,
        max_dimensions: None,
        lossless: true,
        construct: || Box::new(RgbEncoder { keep_alpha: true }),
    });
    #[cfg(feature = "webp")]
    specs.push(StillEncoderSpec {
        name: "webp",
        accepted_formats: vec![PixelFormat::Rgb, PixelFormat::Rgbx, PixelFormat::Rgba, PixelFormat::Bgrx, PixelFormat::Bgra],
        quality: 85,
        speed: 60,
        setup_cost: 15,
        max_dimensions: None,
        lossless: false,
        construct: || Box::new(WebpEncoder),
    });
    specs
}

#[cfg(test)]
mod tests {
    use super::*;
    use wincast_types::HeapImage;

    fn checker(w: u32, h: u32) -> HeapImage {
        let mut pixels = vec![0u8; (w * h * 4) as usize];
        for (i, px) in pixels.chunks_exact_mut(4).enumerate() {
            let v = if i % 2 == 0 { 255 } else { 0 };
            px.copy_from_slice(&[v, v, v, 255]);
        }
        HeapImage::new(w, h, w * 4, PixelFormat::Rgba, pixels)
    }

    #[test]
    #[cfg(feature = "png")]
    fn png_round_trips_through_the_image_crate() {
        let mut enc = PngEncoder::new(PngVariant::Rgb);
        let img = checker(8, 8);
        let payload = enc
            .encode(&img, EncodeParams { quality: 100, speed: 50 })
            .unwrap();
        assert_eq!(&payload[0..8], &[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n']);
    }

    #[test]
    fn rgb_encoder_skips_compression_when_it_does_not_help() {
        // Random-looking small payload: zlib overhead alone exceeds 32
        // bytes saved, so the encoder must fall back to level 0.
        let mut enc = RgbEncoder { keep_alpha: false };
        let mut pixels = vec![0u8; 64];
        for (i, p) in pixels.iter_mut().enumerate() {
            *p = (i as u8).wrapping_mul(73).wrapping_add(11);
        }
        let img = HeapImage::new(4, 4, 16, PixelFormat::Rgbx, pixels);
        let out = enc
            .encode(&img, EncodeParams { quality: 90, speed: 90 })
            .unwrap();
        assert_eq!(out.len(), 4 * 4 * 3);
    }

    #[test]
    fn rgb_level_rises_as_speed_drops() {
        assert!(RgbEncoder::level_for_speed(100, 4096) <= RgbEncoder::level_for_speed(10, 4096));
    }
}
