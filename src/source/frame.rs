use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Decoded frame. Not `Clone`: a hand-off always moves it to the next owner.
#[derive(Debug)]
pub struct Frame {
    /// Pixel data, `meta.stride * meta.height` bytes
    pub data: Bytes,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,

    /// When the frame came out of the decoder
    pub timestamp: Instant,
}

/// Frame metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    /// Bytes per row
    pub stride: u32,
    pub format: PixelFormat,
}

/// Decoded pixel layouts a source may hand out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgb24,
    Bgr24,
    Rgba32,
    Bgra32,
    Gray8,
    /// Packed YUV 4:2:2, two pixels per four bytes (Y0 U Y1 V)
    Yuyv422,
}

impl PixelFormat {
    /// Bytes per pixel (YUYV averages two)
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => 3,
            PixelFormat::Rgba32 | PixelFormat::Bgra32 => 4,
            PixelFormat::Gray8 => 1,
            PixelFormat::Yuyv422 => 2,
        }
    }
}

impl Frame {
    /// Build a tightly packed frame (stride = width * bytes per pixel)
    pub fn packed(
        sequence: u64,
        width: u32,
        height: u32,
        format: PixelFormat,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            data: data.into(),
            meta: Arc::new(FrameMetadata {
                sequence,
                width,
                height,
                stride: width * format.bytes_per_pixel(),
                format,
            }),
            timestamp: Instant::now(),
        }
    }

    pub fn sequence(&self) -> u64 {
        self.meta.sequence
    }

    pub fn format(&self) -> PixelFormat {
        self.meta.format
    }
}
