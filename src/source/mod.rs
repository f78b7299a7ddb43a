//! Frame sources. Decoding is delegated to `jpeg-decoder` and `image`.

pub mod convert;
pub mod frame;
pub mod mjpeg;
pub mod pattern;
pub mod sequence;

use std::path::Path;

use tracing::instrument;

pub use frame::{Frame, FrameMetadata, PixelFormat};
pub use mjpeg::MjpegSource;
pub use pattern::TestPatternSource;
pub use sequence::ImageSequenceSource;

use crate::{Error, Result};

/// A decoded frame stream owned by exactly one producer
pub trait VideoSource: Send {
    /// Path or URI the source was opened from
    fn locator(&self) -> &str;

    /// Decode the next frame. `Ok(None)` marks end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Release the underlying resource. Later calls to `next_frame` return `Ok(None)`.
    fn close(&mut self);
}

/// Open `path` with the adapter matching what it is:
/// a `testsrc:` pattern, a directory of images, an `.mjpeg`/`.mjpg` stream,
/// or a single still image.
#[instrument]
pub fn open(path: &Path) -> Result<Box<dyn VideoSource>> {
    let locator = path.display().to_string();
    if locator.starts_with(pattern::SCHEME) {
        return Ok(Box::new(TestPatternSource::parse(&locator)?));
    }
    if !path.exists() {
        return Err(Error::unavailable(locator, "no such file or directory"));
    }
    if path.is_dir() {
        return Ok(Box::new(ImageSequenceSource::open(path)?));
    }

    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("mjpeg" | "mjpg") => Ok(Box::new(MjpegSource::open(path)?)),
        _ if sequence::is_image(path) => Ok(Box::new(ImageSequenceSource::single(path)?)),
        _ => Err(Error::unavailable(locator, "unsupported container")),
    }
}
