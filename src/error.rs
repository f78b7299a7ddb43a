/// Errors raised by sources, conversion and the dispatcher
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The source could not be opened. Non-fatal: the producer finishes without frames.
    #[error("video source {locator} unavailable: {reason}")]
    SourceUnavailable { locator: String, reason: String },

    /// A frame could not be decoded or converted. Ends playback like end-of-stream.
    #[error("decode failure in {locator} at frame {sequence}: {reason}")]
    DecodeFailure {
        locator: String,
        sequence: u64,
        reason: String,
    },

    #[error("failed to spawn execution context for {0}")]
    Spawn(String, #[source] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl Error {
    pub fn unavailable(locator: impl Into<String>, reason: impl ToString) -> Self {
        Self::SourceUnavailable {
            locator: locator.into(),
            reason: reason.to_string(),
        }
    }

    pub fn decode(locator: impl Into<String>, sequence: u64, reason: impl ToString) -> Self {
        Self::DecodeFailure {
            locator: locator.into(),
            sequence,
            reason: reason.to_string(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
