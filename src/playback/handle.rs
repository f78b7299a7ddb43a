use std::sync::Arc;

use tracing::info;

use super::state::{Lifecycle, PlaybackControl, PlaybackState, PlayerId, PlayerStats};

/// Clonable control surface for one producer (the Play/Pause and Stop controls)
#[derive(Debug, Clone)]
pub struct PlayerHandle {
    id: PlayerId,
    locator: Arc<str>,
    control: Arc<PlaybackControl>,
    stats: Arc<PlayerStats>,
}

impl PlayerHandle {
    pub(crate) fn new(
        id: PlayerId,
        locator: String,
        control: Arc<PlaybackControl>,
        stats: Arc<PlayerStats>,
    ) -> Self {
        Self {
            id,
            locator: locator.into(),
            control,
            stats,
        }
    }

    /// Force the lifecycle to its end for a producer that died without completing
    pub(crate) fn abandon(&self) {
        self.control.stop();
        self.control.terminate();
    }

    pub fn id(&self) -> PlayerId {
        self.id
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub fn state(&self) -> PlaybackState {
        self.control.state()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.control.lifecycle()
    }

    pub fn stats(&self) -> &PlayerStats {
        &self.stats
    }

    /// Halt frame publication without closing the source
    pub fn pause(&self) -> bool {
        let paused = self.control.pause();
        if paused {
            info!(player = %self.id, "Paused");
        }
        paused
    }

    pub fn resume(&self) -> bool {
        let resumed = self.control.resume();
        if resumed {
            info!(player = %self.id, "Resumed");
        }
        resumed
    }

    pub fn toggle(&self) -> PlaybackState {
        let state = self.control.toggle();
        info!(player = %self.id, "Toggled to {:?}", state);
        state
    }

    /// Cooperative stop, observed within one loop iteration
    pub fn stop(&self) -> bool {
        let stopping = self.control.stop();
        if stopping {
            info!(player = %self.id, "Stop requested");
        }
        stopping
    }

    /// Text for the per-player rate label
    pub fn fps_label(&self) -> String {
        format!("FPS: {:.2}", self.stats.last_fps())
    }
}
