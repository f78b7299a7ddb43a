//! Directory of still images played in file-name order

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use image::DynamicImage;
use tracing::{debug, info, instrument};

use super::frame::{Frame, FrameMetadata, PixelFormat};
use super::VideoSource;
use crate::{Error, Result};

pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

pub struct ImageSequenceSource {
    locator: String,
    files: Vec<PathBuf>,
    next: usize,
    closed: bool,
}

impl ImageSequenceSource {
    #[instrument(skip_all, fields(dir = %dir.as_ref().display()))]
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let locator = dir.display().to_string();

        let entries = std::fs::read_dir(dir).map_err(|e| Error::unavailable(&locator, e))?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| Error::unavailable(&locator, e))?.path();
            if path.is_file() && is_image(&path) {
                files.push(path);
            }
        }
        files.sort();

        Self::from_files(locator, files)
    }

    /// Single still image, played as a one-frame stream
    pub fn single(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let locator = path.display().to_string();
        if !path.is_file() {
            return Err(Error::unavailable(locator, "no such file"));
        }
        Self::from_files(locator, vec![path.to_path_buf()])
    }

    fn from_files(locator: String, files: Vec<PathBuf>) -> Result<Self> {
        if files.is_empty() {
            return Err(Error::unavailable(locator, "no images found"));
        }
        info!("Opened image sequence {} ({} frames)", locator, files.len());
        Ok(Self {
            locator,
            files,
            next: 0,
            closed: false,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl VideoSource for ImageSequenceSource {
    fn locator(&self) -> &str {
        &self.locator
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.closed {
            return Ok(None);
        }
        let Some(path) = self.files.get(self.next) else {
            return Ok(None);
        };
        let sequence = self.next as u64 + 1;
        self.next += 1;

        let image = image::open(path).map_err(|e| Error::decode(&self.locator, sequence, e))?;
        let (width, height) = (image.width(), image.height());
        let (format, pixels) = match image {
            DynamicImage::ImageRgb8(buf) => (PixelFormat::Rgb24, buf.into_raw()),
            DynamicImage::ImageRgba8(buf) => (PixelFormat::Rgba32, buf.into_raw()),
            DynamicImage::ImageLuma8(buf) => (PixelFormat::Gray8, buf.into_raw()),
            other => (PixelFormat::Rgb24, other.into_rgb8().into_raw()),
        };
        debug!("Decoded {} as {:?} {}x{}", path.display(), format, width, height);

        Ok(Some(Frame {
            data: Bytes::from(pixels),
            meta: Arc::new(FrameMetadata {
                sequence,
                width,
                height,
                stride: width * format.bytes_per_pixel(),
                format,
            }),
            timestamp: Instant::now(),
        }))
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            debug!("Closed image sequence {}", self.locator);
        }
    }
}

pub fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, RgbaImage};

    #[test]
    fn plays_images_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        GrayImage::from_pixel(4, 2, image::Luma([7])).save(dir.path().join("b.png")).unwrap();
        RgbaImage::from_pixel(4, 2, image::Rgba([1, 2, 3, 4]))
            .save(dir.path().join("a.png"))
            .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut source = ImageSequenceSource::open(dir.path()).unwrap();
        assert_eq!(source.len(), 2);

        let first = source.next_frame().unwrap().unwrap();
        assert_eq!(first.format(), PixelFormat::Rgba32);
        assert_eq!(&first.data[..4], &[1, 2, 3, 4]);

        let second = source.next_frame().unwrap().unwrap();
        assert_eq!(second.format(), PixelFormat::Gray8);
        assert_eq!(second.sequence(), 2);

        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn empty_directory_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ImageSequenceSource::open(dir.path()),
            Err(Error::SourceUnavailable { .. })
        ));
    }

    #[test]
    fn unreadable_image_is_a_decode_failure() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.png"), b"\x89PNG garbage").unwrap();

        let mut source = ImageSequenceSource::open(dir.path()).unwrap();
        assert!(matches!(
            source.next_frame(),
            Err(Error::DecodeFailure { sequence: 1, .. })
        ));
        assert!(source.next_frame().unwrap().is_none());
    }
}
