//! Lock-free playback control shared between a producer and its handles

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

/// Identifies one producer for the lifetime of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(pub u64);

impl PlayerId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "player-{}", self.0)
    }
}

/// Playback state as seen by the producer loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackState {
    Stopped,
    Running,
    Paused,
}

/// Full lifecycle of a producer and its execution context.
///
/// `Idle -> Running -> (Paused <-> Running)* -> Stopping -> Terminated`.
/// `Terminated` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Lifecycle {
    Idle = 0,
    Running = 1,
    Paused = 2,
    Stopping = 3,
    Terminated = 4,
}

impl Lifecycle {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Lifecycle::Idle,
            1 => Lifecycle::Running,
            2 => Lifecycle::Paused,
            3 => Lifecycle::Stopping,
            _ => Lifecycle::Terminated,
        }
    }

    pub fn playback_state(self) -> PlaybackState {
        match self {
            Lifecycle::Running => PlaybackState::Running,
            Lifecycle::Paused => PlaybackState::Paused,
            Lifecycle::Idle | Lifecycle::Stopping | Lifecycle::Terminated => PlaybackState::Stopped,
        }
    }
}

/// Atomic lifecycle cell shared by a producer and its handles.
/// Every transition is a compare-and-swap.
#[derive(Debug)]
pub struct PlaybackControl {
    lifecycle: AtomicU8,
}

impl Default for PlaybackControl {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackControl {
    pub fn new() -> Self {
        Self {
            lifecycle: AtomicU8::new(Lifecycle::Idle as u8),
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle::from_u8(self.lifecycle.load(Ordering::Acquire))
    }

    pub fn state(&self) -> PlaybackState {
        self.lifecycle().playback_state()
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == PlaybackState::Stopped
    }

    fn transition(&self, from: Lifecycle, to: Lifecycle) -> bool {
        self.lifecycle
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// `Idle -> Running`. Fails for a control that was already started or stopped.
    pub fn begin(&self) -> bool {
        self.transition(Lifecycle::Idle, Lifecycle::Running)
    }

    /// `Running -> Paused`
    pub fn pause(&self) -> bool {
        self.transition(Lifecycle::Running, Lifecycle::Paused)
    }

    /// `Paused -> Running`
    pub fn resume(&self) -> bool {
        self.transition(Lifecycle::Paused, Lifecycle::Running)
    }

    /// Flip between running and paused. Returns the state after the call.
    pub fn toggle(&self) -> PlaybackState {
        if !self.pause() {
            self.resume();
        }
        self.state()
    }

    /// Request a stop. Observed by the producer at its next loop boundary.
    /// Returns `false` when already stopping or terminated.
    pub fn stop(&self) -> bool {
        let mut current = self.lifecycle.load(Ordering::Acquire);
        loop {
            match Lifecycle::from_u8(current) {
                Lifecycle::Stopping | Lifecycle::Terminated => return false,
                _ => {}
            }
            match self.lifecycle.compare_exchange_weak(
                current,
                Lifecycle::Stopping as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Mark the execution context as finished. No further events follow.
    pub(crate) fn terminate(&self) {
        self.lifecycle
            .store(Lifecycle::Terminated as u8, Ordering::Release);
    }
}

/// Counters published by a producer, readable from any thread
#[derive(Debug, Default)]
pub struct PlayerStats {
    frames_published: AtomicU64,
    last_fps_bits: AtomicU64,
}

impl PlayerStats {
    pub(crate) fn record_frame(&self, fps: f64) {
        self.frames_published.fetch_add(1, Ordering::Relaxed);
        self.last_fps_bits.store(fps.to_bits(), Ordering::Relaxed);
    }

    pub fn frames_published(&self) -> u64 {
        self.frames_published.load(Ordering::Relaxed)
    }

    /// Most recent frame rate sample, `0.0` before the first frame
    pub fn last_fps(&self) -> f64 {
        f64::from_bits(self.last_fps_bits.load(Ordering::Relaxed))
    }
}
