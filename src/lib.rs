pub mod error;
pub mod monitor;
pub mod playback;
pub mod present;
pub mod source;

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use error::{Error, Result};
pub use playback::{
    CompletionReason, Dispatcher, FrameProducer, Lifecycle, PlaybackState, PlayerEvent,
    PlayerHandle, PlayerId,
};
pub use source::{Frame, PixelFormat, VideoSource};

/// Prefix for environment overrides, e.g. `VIDPACE__PLAYBACK__FRAME_INTERVAL_MS=40`
pub const ENV_PREFIX: &str = "VIDPACE";

/// System configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub playback: PlaybackConfig,
    pub dispatcher: DispatcherConfig,
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Fixed throttle after each published frame
    pub frame_interval_ms: u64,
    /// Re-check delay while paused
    pub pause_poll_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Per-player channel capacity
    pub event_capacity: usize,
    /// How long `shutdown` waits for each execution context
    pub shutdown_timeout_ms: u64,
    pub thread_name_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub enabled: bool,
    pub interval_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: 30, // ~33fps
            pause_poll_ms: 100,
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            event_capacity: 1,
            shutdown_timeout_ms: 2000,
            thread_name_prefix: "vidpace".into(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 1000,
        }
    }
}

impl PlaybackConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn pause_poll(&self) -> Duration {
        Duration::from_millis(self.pause_poll_ms)
    }
}

impl DispatcherConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Config {
    /// Defaults, overlaid with an optional TOML file, overlaid with
    /// `VIDPACE__SECTION__KEY` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }
}
