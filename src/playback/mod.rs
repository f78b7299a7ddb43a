pub mod dispatcher;
pub mod events;
pub mod handle;
pub mod producer;
pub mod state;

pub use dispatcher::Dispatcher;
pub use events::{CompletionReason, PlayerEvent};
pub use handle::PlayerHandle;
pub use producer::{FrameProducer, FrameRateMeter, SourceOpener};
pub use state::{Lifecycle, PlaybackControl, PlaybackState, PlayerId, PlayerStats};
