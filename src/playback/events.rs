use serde::{Deserialize, Serialize};

use super::state::PlayerId;
use crate::source::Frame;

/// Why a producer finished. Exactly one `Finished` event is emitted per lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CompletionReason {
    /// The source ran out of frames
    EndOfStream,
    /// `stop()` was observed at a loop boundary
    Stopped,
    /// The source could not be opened, no frames were produced
    SourceUnavailable,
    /// A frame failed to decode or convert. Ends playback like end-of-stream.
    DecodeFailure,
}

impl CompletionReason {
    /// Natural end of playback, as opposed to a cancellation
    pub fn is_natural(self) -> bool {
        !matches!(self, CompletionReason::Stopped)
    }
}

/// Events marshaled from a producer to the presentation context, in emission order
#[derive(Debug)]
pub enum PlayerEvent {
    Frame {
        player: PlayerId,
        frame: Frame,
        fps: f64,
    },
    Finished {
        player: PlayerId,
        reason: CompletionReason,
    },
}

impl PlayerEvent {
    pub fn player(&self) -> PlayerId {
        match self {
            PlayerEvent::Frame { player, .. } | PlayerEvent::Finished { player, .. } => *player,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_stop_is_a_cancellation() {
        assert!(CompletionReason::EndOfStream.is_natural());
        assert!(CompletionReason::SourceUnavailable.is_natural());
        assert!(CompletionReason::DecodeFailure.is_natural());
        assert!(!CompletionReason::Stopped.is_natural());
    }
}
