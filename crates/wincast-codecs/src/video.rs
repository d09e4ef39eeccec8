//! Streaming video encoders. The only implementation compiled by default is
//! an H.264 encoder backed by `openh264` (Cisco's BSD-licensed encoder).
//! The registry calls it `"x264"` so the selector's decision table and
//! every caller that names that encoding explicitly need no translation
//! layer.

use wincast_types::PixelFormat;

use crate::spec::VideoEncoderSpec;

#[cfg(feature = "video-h264")]
mod h264 {
    use openh264::encoder::{Encoder, EncoderConfig};
    use openh264::formats::YUVBuffer;
    use wincast_types::{Image, PixelFormat};

    use crate::error::{CodecError, Result};
    use crate::spec::VideoEncoderImpl;

    /// Wraps `openh264::encoder::Encoder`, rebuilt whenever dimensions
    /// change (the pipeline owns that decision; this type just encodes
    /// whatever it's handed at its configured size).
    pub struct H264Encoder {
        inner: Option<Encoder>,
        width: u32,
        height: u32,
    }

    impl H264Encoder {
        #[must_use]
        pub fn new() -> Self {
            Self {
                inner: None,
                width: 0,
                height: 0,
            }
        }

        fn ensure_encoder(&mut self, width: u32, height: u32) -> Result<&mut Encoder> {
            if self.inner.is_none() || self.width != width || self.height != height {
                let config = EncoderConfig::new();
                let encoder = Encoder::with_config(config).map_err(|err| CodecError::VideoSetupFailed {
                    reason: err.to_string(),
                })?;
                self.inner = Some(encoder);
                self.width = width;
                self.height = height;
            }
            Ok(self.inner.as_mut().expect("just constructed"))
        }
    }

    impl VideoEncoderImpl for H264Encoder {
        fn encode(&mut self, image: &dyn Image, _quality: u8, _speed: u8) -> Result<Vec<u8>> {
            if image.pixel_format() != PixelFormat::Yuv420p {
                return Err(CodecError::VideoEncodeFailed {
                    reason: format!("x264 requires YUV420P input, got {}", image.pixel_format()),
                });
            }
            let width = image.width();
            let height = image.height();
            let y_size = (width * height) as usize;
            let c_size = y_size / 4;
            let pixels = image.pixels();
            if pixels.len() < y_size + 2 * c_size {
                return Err(CodecError::BufferTooShort {
                    expected: y_size + 2 * c_size,
                    actual: pixels.len(),
                });
            }
            let yuv = YUVBuffer::from_vec(pixels.to_vec(), width as usize, height as usize);
            let encoder = self.ensure_encoder(width, height)?;
            let bitstream = encoder.encode(&yuv).map_err(|err| CodecError::VideoEncodeFailed {
                reason: err.to_string(),
            })?;
            Ok(bitstream.to_vec())
        }

        fn reset(&mut self) {
            self.inner = None;
        }
    }
}

#[cfg(not(feature = "video-h264"))]
mod h264 {
    use wincast_types::Image;

    use crate::error::{CodecError, Result};
    use crate::spec::VideoEncoderImpl;

    /// Stand-in used when the crate is built without the `video-h264`
    /// feature: always reports setup failure so the pipeline falls back to
    /// a still encoder rather than silently producing no video path at all.
    pub struct H264Encoder;

    impl H264Encoder {
        #[must_use]
        pub fn new() -> Self {
            Self
        }
    }

    impl VideoEncoderImpl for H264Encoder {
        fn encode(&mut self, _image: &dyn Image, _quality: u8, _speed: u8) -> Result<Vec<u8>> {
            Err(CodecError::VideoSetupFailed {
                reason: "built without the video-h264 feature".to_owned(),
            })
        }

        fn reset(&mut self) {}
    }
}

pub use h264::H264Encoder;

impl Default for H264Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// x264 requires even width/height (its chroma planes are exactly half
/// resolution); odd dimensions are split by [`crate::selector`] before the
/// region ever reaches the pipeline, so `max_dimensions` here only bounds
/// what openh264 is configured to accept, not parity.
#[must_use]
pub fn default_video_encoders() -> Vec<VideoEncoderSpec> {
    vec![VideoEncoderSpec {
        name: "x264",
        accepted_format: PixelFormat::Yuv420p,
        quality: 75,
        speed: 60,
        setup_cost: 60,
        max_dimensions: Some((7680, 4320)),
        construct: || Box::new(H264Encoder::new()),
    }]
}
