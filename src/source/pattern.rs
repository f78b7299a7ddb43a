//! Synthetic colour-bar source, addressed as `testsrc:<frames>` or `testsrc:<frames>:<w>x<h>`

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;

use super::frame::{Frame, FrameMetadata, PixelFormat};
use super::VideoSource;
use crate::{Error, Result};

pub const SCHEME: &str = "testsrc:";

/// Largest accepted width or height
pub const MAX_SIDE: u32 = 8192;

const BARS_BGR: [[u8; 3]; 7] = [
    [255, 255, 255],
    [0, 255, 255],
    [255, 255, 0],
    [0, 255, 0],
    [255, 0, 255],
    [0, 0, 255],
    [255, 0, 0],
];

/// Scrolling colour bars in `Bgr24`, so every frame goes through conversion
pub struct TestPatternSource {
    locator: String,
    width: u32,
    height: u32,
    /// `None` plays forever
    frames: Option<u64>,
    sequence: u64,
    closed: bool,
}

impl TestPatternSource {
    /// Sides are clamped to `1..=MAX_SIDE`
    pub fn new(width: u32, height: u32, frames: Option<u64>) -> Self {
        let width = width.clamp(1, MAX_SIDE);
        let height = height.clamp(1, MAX_SIDE);
        let locator = match frames {
            Some(n) => format!("{SCHEME}{n}:{width}x{height}"),
            None => format!("{SCHEME}inf:{width}x{height}"),
        };
        Self {
            locator,
            width,
            height,
            frames,
            sequence: 0,
            closed: false,
        }
    }

    /// Parse `testsrc:<frames|inf>[:<w>x<h>]`
    pub fn parse(locator: &str) -> Result<Self> {
        let spec = locator
            .strip_prefix(SCHEME)
            .ok_or_else(|| Error::unavailable(locator, "not a test pattern"))?;
        let mut parts = spec.splitn(2, ':');

        let frames = match parts.next().unwrap_or("") {
            "" | "inf" => None,
            n => Some(
                n.parse::<u64>()
                    .map_err(|e| Error::unavailable(locator, format!("bad frame count: {e}")))?,
            ),
        };
        let (width, height) = match parts.next() {
            None => (64, 36),
            Some(size) => {
                let (w, h) = size
                    .split_once('x')
                    .ok_or_else(|| Error::unavailable(locator, "size must be <w>x<h>"))?;
                let parse = |v: &str| {
                    v.parse::<u32>()
                        .ok()
                        .filter(|v| (1..=MAX_SIDE).contains(v))
                        .ok_or_else(|| Error::unavailable(locator, "bad frame size"))
                };
                (parse(w)?, parse(h)?)
            }
        };

        Ok(Self::new(width, height, frames))
    }
}

impl VideoSource for TestPatternSource {
    fn locator(&self) -> &str {
        &self.locator
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.closed || self.frames.is_some_and(|n| self.sequence >= n) {
            return Ok(None);
        }
        self.sequence += 1;

        let bar_width = (self.width / BARS_BGR.len() as u32).max(1);
        let shift = self.sequence as u32;
        let mut data = Vec::with_capacity(self.width as usize * self.height as usize * 3);
        for _ in 0..self.height {
            for x in 0..self.width {
                let bar = (x.wrapping_add(shift) / bar_width) as usize % BARS_BGR.len();
                data.extend_from_slice(&BARS_BGR[bar]);
            }
        }

        Ok(Some(Frame {
            data: Bytes::from(data),
            meta: Arc::new(FrameMetadata {
                sequence: self.sequence,
                width: self.width,
                height: self.height,
                stride: self.width * 3,
                format: PixelFormat::Bgr24,
            }),
            timestamp: Instant::now(),
        }))
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_count_and_size() {
        let source = TestPatternSource::parse("testsrc:5:8x4").unwrap();
        assert_eq!((source.width, source.height, source.frames), (8, 4, Some(5)));

        let source = TestPatternSource::parse("testsrc:inf").unwrap();
        assert_eq!(source.frames, None);

        assert!(TestPatternSource::parse("testsrc:five").is_err());
        assert!(TestPatternSource::parse("testsrc:1:0x4").is_err());
        assert!(TestPatternSource::parse("testsrc:1:8by4").is_err());
        assert!(TestPatternSource::parse("testsrc:1:70000x70000").is_err());
    }

    #[test]
    fn oversized_patterns_are_clamped() {
        let source = TestPatternSource::new(u32::MAX, 0, Some(1));
        assert_eq!((source.width, source.height), (MAX_SIDE, 1));
    }

    #[test]
    fn long_running_shift_wraps() {
        let mut source = TestPatternSource::new(4, 1, None);
        source.sequence = u64::from(u32::MAX) - 1;
        let frame = source.next_frame().unwrap().unwrap();
        assert_eq!(frame.data.len(), 4 * 3);
    }

    #[test]
    fn finite_pattern_ends() {
        let mut source = TestPatternSource::new(14, 2, Some(2));
        let frame = source.next_frame().unwrap().unwrap();
        assert_eq!(frame.format(), PixelFormat::Bgr24);
        assert_eq!(frame.data.len(), 14 * 2 * 3);
        assert!(source.next_frame().unwrap().is_some());
        assert!(source.next_frame().unwrap().is_none());
    }
}
