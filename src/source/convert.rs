//! Colour conversion to the display-ready `Rgb24` layout

use std::sync::Arc;

use bytes::Bytes;

use super::frame::{Frame, FrameMetadata, PixelFormat};
use crate::{Error, Result};

/// Convert a decoded frame to packed `Rgb24`.
///
/// Frames that are already packed RGB pass through without copying. Row padding
/// (`stride` larger than the visible row) is dropped from the output.
pub fn to_rgb24(frame: Frame, locator: &str) -> Result<Frame> {
    let meta = Arc::clone(&frame.meta);
    let format = meta.format;
    let width = meta.width as usize;
    let height = meta.height as usize;
    let stride = meta.stride as usize;
    let row_bytes = width * format.bytes_per_pixel() as usize;

    if width == 0 || height == 0 {
        return Err(Error::decode(
            locator,
            meta.sequence,
            format!("empty {width}x{height} frame"),
        ));
    }
    if stride < row_bytes {
        return Err(Error::decode(
            locator,
            meta.sequence,
            format!("stride {stride} shorter than row of {row_bytes} bytes"),
        ));
    }
    if frame.data.len() < stride * height {
        return Err(Error::decode(
            locator,
            meta.sequence,
            format!(
                "buffer holds {} bytes, expected {}",
                frame.data.len(),
                stride * height
            ),
        ));
    }
    if format == PixelFormat::Yuyv422 && width % 2 != 0 {
        return Err(Error::decode(
            locator,
            meta.sequence,
            "YUYV frame with odd width",
        ));
    }

    if format == PixelFormat::Rgb24 && stride == row_bytes {
        return Ok(frame);
    }

    let mut rgb = Vec::with_capacity(width * height * 3);
    for row in frame.data.chunks(stride).take(height) {
        let row = &row[..row_bytes];
        match format {
            PixelFormat::Rgb24 => rgb.extend_from_slice(row),
            PixelFormat::Bgr24 => {
                for px in row.chunks_exact(3) {
                    rgb.extend_from_slice(&[px[2], px[1], px[0]]);
                }
            }
            PixelFormat::Rgba32 => {
                for px in row.chunks_exact(4) {
                    rgb.extend_from_slice(&px[..3]);
                }
            }
            PixelFormat::Bgra32 => {
                for px in row.chunks_exact(4) {
                    rgb.extend_from_slice(&[px[2], px[1], px[0]]);
                }
            }
            PixelFormat::Gray8 => {
                for &y in row {
                    rgb.extend_from_slice(&[y, y, y]);
                }
            }
            PixelFormat::Yuyv422 => {
                for px in row.chunks_exact(4) {
                    let (y0, u, y1, v) = (px[0], px[1], px[2], px[3]);
                    rgb.extend_from_slice(&yuv_to_rgb(y0, u, v));
                    rgb.extend_from_slice(&yuv_to_rgb(y1, u, v));
                }
            }
        }
    }

    Ok(Frame {
        data: Bytes::from(rgb),
        meta: Arc::new(FrameMetadata {
            stride: meta.width * 3,
            format: PixelFormat::Rgb24,
            ..(*meta).clone()
        }),
        timestamp: frame.timestamp,
    })
}

/// BT.601 limited range, integer arithmetic
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = i32::from(y) - 16;
    let d = i32::from(u) - 128;
    let e = i32::from(v) - 128;

    let clamp = |x: i32| x.clamp(0, 255) as u8;
    [
        clamp((298 * c + 409 * e + 128) >> 8),
        clamp((298 * c - 100 * d - 208 * e + 128) >> 8),
        clamp((298 * c + 516 * d + 128) >> 8),
    ]
}
