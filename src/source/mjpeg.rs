//! Motion-JPEG file source: JPEG images stored back to back

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use jpeg_decoder::{Decoder, PixelFormat as JpegPixelFormat};
use tracing::{debug, info, instrument};

use super::frame::{Frame, FrameMetadata, PixelFormat};
use super::VideoSource;
use crate::{Error, Result};

const SOI: u8 = 0xD8;
const EOI: u8 = 0xD9;
const SOS: u8 = 0xDA;
const RST0: u8 = 0xD0;
const RST7: u8 = 0xD7;
const TEM: u8 = 0x01;

pub struct MjpegSource {
    locator: String,
    data: Bytes,
    cursor: usize,
    sequence: u64,
    closed: bool,
}

impl MjpegSource {
    /// Read the whole file and check it holds at least one JPEG start marker.
    /// Frames are decoded lazily in `next_frame`.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let locator = path.display().to_string();
        let data = std::fs::read(path).map_err(|e| Error::unavailable(&locator, e))?;

        Self::from_bytes(locator, Bytes::from(data))
    }

    pub fn from_bytes(locator: impl Into<String>, data: Bytes) -> Result<Self> {
        let locator = locator.into();
        if find_marker(&data, 0, SOI).is_none() {
            return Err(Error::unavailable(locator, "no JPEG frames in stream"));
        }

        info!("Opened MJPEG source {} ({} bytes)", locator, data.len());
        Ok(Self {
            locator,
            data,
            cursor: 0,
            sequence: 0,
            closed: false,
        })
    }

    /// Slice the next complete JPEG image out of the stream, advancing the cursor
    fn next_segment(&mut self) -> Result<Option<Bytes>> {
        let Some(start) = find_marker(&self.data, self.cursor, SOI) else {
            return Ok(None);
        };
        let Some(end) = image_end(&self.data, start) else {
            self.cursor = self.data.len();
            return Err(Error::decode(
                &self.locator,
                self.sequence + 1,
                "truncated JPEG frame",
            ));
        };

        self.cursor = end;
        Ok(Some(self.data.slice(start..end)))
    }
}

impl VideoSource for MjpegSource {
    fn locator(&self) -> &str {
        &self.locator
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.closed {
            return Ok(None);
        }
        let Some(segment) = self.next_segment()? else {
            return Ok(None);
        };
        let sequence = self.sequence + 1;

        let mut decoder = Decoder::new(&segment[..]);
        let pixels = decoder
            .decode()
            .map_err(|e| Error::decode(&self.locator, sequence, e))?;
        let info = decoder
            .info()
            .ok_or_else(|| Error::decode(&self.locator, sequence, "missing image header"))?;

        let format = match info.pixel_format {
            JpegPixelFormat::RGB24 => PixelFormat::Rgb24,
            JpegPixelFormat::L8 => PixelFormat::Gray8,
            other => {
                return Err(Error::decode(
                    &self.locator,
                    sequence,
                    format!("unsupported JPEG pixel format {other:?}"),
                ))
            }
        };

        self.sequence = sequence;
        debug!(
            "Decoded MJPEG frame {} ({}x{})",
            sequence, info.width, info.height
        );

        let width = u32::from(info.width);
        Ok(Some(Frame {
            data: Bytes::from(pixels),
            meta: Arc::new(FrameMetadata {
                sequence,
                width,
                height: u32::from(info.height),
                stride: width * format.bytes_per_pixel(),
                format,
            }),
            timestamp: Instant::now(),
        }))
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.data = Bytes::new();
            debug!("Closed MJPEG source {}", self.locator);
        }
    }
}

/// Offset of the next `FF <marker>` pair at or after `from`
fn find_marker(data: &[u8], from: usize, marker: u8) -> Option<usize> {
    data.get(from..)?
        .windows(2)
        .position(|w| w[0] == 0xFF && w[1] == marker)
        .map(|pos| from + pos)
}

/// Offset just past the EOI of the image whose SOI is at `soi`.
///
/// Walks the marker segments by their length fields so that markers embedded in
/// APPn payloads (EXIF thumbnails carry their own SOI..EOI) are skipped. After
/// each SOS the entropy-coded data is scanned, where `FF 00` is a stuffed byte
/// and `FF D0..D7` are restart markers.
fn image_end(data: &[u8], soi: usize) -> Option<usize> {
    let mut pos = soi + 2;
    loop {
        if *data.get(pos)? != 0xFF {
            return None;
        }
        // Fill bytes before a marker
        while *data.get(pos + 1)? == 0xFF {
            pos += 1;
        }
        let marker = data[pos + 1];
        match marker {
            EOI => return Some(pos + 2),
            TEM | RST0..=RST7 => pos += 2,
            _ => {
                let len = data.get(pos + 2..pos + 4)?;
                let len = usize::from(u16::from_be_bytes([len[0], len[1]]));
                if len < 2 {
                    return None;
                }
                pos += 2 + len;
                if marker == SOS {
                    pos = entropy_end(data, pos)?;
                }
            }
        }
    }
}

/// Offset of the first real marker after entropy-coded data starting at `from`
fn entropy_end(data: &[u8], mut pos: usize) -> Option<usize> {
    loop {
        if *data.get(pos)? != 0xFF {
            pos += 1;
            continue;
        }
        match *data.get(pos + 1)? {
            0x00 | RST0..=RST7 => pos += 2,
            0xFF => pos += 1,
            _ => return Some(pos),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::codecs::jpeg::JpegEncoder;
    use image::ExtendedColorType;

    /// Encode `count` solid-colour RGB frames as one MJPEG stream
    pub(crate) fn mjpeg_stream(count: usize, width: u32, height: u32) -> Vec<u8> {
        let mut stream = Vec::new();
        for i in 0..count {
            let shade = (i * 40 % 256) as u8;
            let rgb = vec![shade; (width * height * 3) as usize];
            let mut jpeg = Vec::new();
            JpegEncoder::new_with_quality(&mut jpeg, 90)
                .encode(&rgb, width, height, ExtendedColorType::Rgb8)
                .unwrap();
            stream.extend_from_slice(&jpeg);
        }
        stream
    }

    #[test]
    fn decodes_every_frame_then_ends() {
        let data = mjpeg_stream(3, 16, 8);
        let mut source = MjpegSource::from_bytes("mem.mjpeg", Bytes::from(data)).unwrap();

        for expected in 1..=3 {
            let frame = source.next_frame().unwrap().unwrap();
            assert_eq!(frame.sequence(), expected);
            assert_eq!(frame.meta.width, 16);
            assert_eq!(frame.meta.height, 8);
            assert_eq!(frame.format(), PixelFormat::Rgb24);
            assert_eq!(frame.data.len(), 16 * 8 * 3);
        }
        assert!(source.next_frame().unwrap().is_none());
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn truncated_tail_is_a_decode_failure() {
        let mut data = mjpeg_stream(2, 8, 8);
        let cut = data.len() - 4;
        data.truncate(cut);
        let mut source = MjpegSource::from_bytes("cut.mjpeg", Bytes::from(data)).unwrap();

        assert!(source.next_frame().unwrap().is_some());
        assert!(matches!(
            source.next_frame(),
            Err(Error::DecodeFailure { sequence: 2, .. })
        ));
    }

    /// Insert an APP1 segment holding a complete JPEG thumbnail right after SOI
    fn with_exif_thumbnail(jpeg: &[u8], thumbnail: &[u8]) -> Vec<u8> {
        let mut payload = b"Exif\0\0".to_vec();
        payload.extend_from_slice(thumbnail);
        let len = u16::try_from(payload.len() + 2).unwrap();

        let mut out = vec![0xFF, SOI, 0xFF, 0xE1];
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(&payload);
        out.extend_from_slice(&jpeg[2..]);
        out
    }

    #[test]
    fn embedded_thumbnail_does_not_split_frame() {
        let thumbnail = mjpeg_stream(1, 8, 8);
        let main = mjpeg_stream(1, 16, 8);
        let frame = with_exif_thumbnail(&main, &thumbnail);
        let mut data = frame.clone();
        data.extend_from_slice(&frame);
        let mut source = MjpegSource::from_bytes("exif.mjpeg", Bytes::from(data)).unwrap();

        for expected in 1..=2 {
            let frame = source.next_frame().unwrap().unwrap();
            assert_eq!(frame.sequence(), expected);
            assert_eq!((frame.meta.width, frame.meta.height), (16, 8));
        }
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn image_end_skips_stuffed_and_restart_markers() {
        let jpeg = [
            0xFF, SOI, // image
            0xFF, 0xE0, 0x00, 0x04, 0xFF, EOI, // APP0 payload that looks like EOI
            0xFF, SOS, 0x00, 0x02, // empty scan header
            0x12, 0xFF, 0x00, 0x34, 0xFF, 0xD3, 0x56, // stuffed byte and RST3
            0xFF, EOI, 0xAA,
        ];
        assert_eq!(image_end(&jpeg, 0), Some(jpeg.len() - 1));
        assert_eq!(image_end(&jpeg[..jpeg.len() - 3], 0), None);
    }

    #[test]
    fn stream_without_jpeg_is_unavailable() {
        let result = MjpegSource::from_bytes("junk.mjpeg", Bytes::from_static(b"not a video"));
        assert!(matches!(result, Err(Error::SourceUnavailable { .. })));
    }

    #[test]
    fn closed_source_yields_nothing() {
        let data = mjpeg_stream(2, 8, 8);
        let mut source = MjpegSource::from_bytes("mem.mjpeg", Bytes::from(data)).unwrap();
        source.close();
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn missing_file_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let result = MjpegSource::open(dir.path().join("nope.mjpeg"));
        assert!(matches!(result, Err(Error::SourceUnavailable { .. })));
    }
}
