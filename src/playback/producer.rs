//! Per-source frame producer: decode, convert, measure, hand off, pace

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use flume::{SendTimeoutError, Sender};
use tracing::{debug, info, instrument, warn};

use super::events::{CompletionReason, PlayerEvent};
use super::handle::PlayerHandle;
use super::state::{PlaybackControl, PlaybackState, PlayerId, PlayerStats};
use crate::source::{self, convert, VideoSource};
use crate::{PlaybackConfig, Result};

/// Opens the producer's source on its own execution context
pub type SourceOpener = Box<dyn FnOnce(&str) -> Result<Box<dyn VideoSource>> + Send>;

/// Smallest delta a frame-rate sample is computed from
const MIN_FRAME_DELTA: Duration = Duration::from_nanos(1);

/// Floor for one blocking send attempt while the consumer is behind
const MIN_HANDOFF_WAIT: Duration = Duration::from_millis(1);

fn handoff_wait(frame_interval: Duration) -> Duration {
    frame_interval.max(MIN_HANDOFF_WAIT)
}

/// Instantaneous frame rate: `1 / Δt` since the previous frame (or since start)
#[derive(Debug, Clone, Copy)]
pub struct FrameRateMeter {
    last: Instant,
}

impl FrameRateMeter {
    pub fn starting_at(start: Instant) -> Self {
        Self { last: start }
    }

    pub fn tick(&mut self) -> f64 {
        self.tick_at(Instant::now())
    }

    pub fn tick_at(&mut self, now: Instant) -> f64 {
        let delta = now.saturating_duration_since(self.last).max(MIN_FRAME_DELTA);
        self.last = self.last.max(now);
        1.0 / delta.as_secs_f64()
    }
}

enum HandOff {
    Delivered,
    Cancelled,
    Disconnected,
}

pub struct FrameProducer {
    id: PlayerId,
    locator: String,
    opener: SourceOpener,
    frame_interval: Duration,
    pause_poll: Duration,
    control: Arc<PlaybackControl>,
    stats: Arc<PlayerStats>,
}

impl FrameProducer {
    pub fn new<F>(locator: impl Into<String>, config: &PlaybackConfig, opener: F) -> Self
    where
        F: FnOnce(&str) -> Result<Box<dyn VideoSource>> + Send + 'static,
    {
        Self {
            id: PlayerId::next(),
            locator: locator.into(),
            opener: Box::new(opener),
            frame_interval: config.frame_interval(),
            pause_poll: config.pause_poll(),
            control: Arc::new(PlaybackControl::new()),
            stats: Arc::new(PlayerStats::default()),
        }
    }

    /// Producer for a file, directory or `testsrc:` locator, opened with [`source::open`]
    pub fn from_path(path: impl Into<PathBuf>, config: &PlaybackConfig) -> Self {
        let path = path.into();
        let locator = path.display().to_string();
        Self::new(locator, config, move |_| source::open(&path))
    }

    pub fn id(&self) -> PlayerId {
        self.id
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    /// Control surface that stays valid after the producer moves to its thread
    pub fn handle(&self) -> PlayerHandle {
        PlayerHandle::new(
            self.id,
            self.locator.clone(),
            Arc::clone(&self.control),
            Arc::clone(&self.stats),
        )
    }

    /// Run the producer loop on the calling thread until stopped or exhausted.
    ///
    /// Emits exactly one `Finished` event before returning, whatever the outcome.
    #[instrument(skip_all, fields(player = %self.id, source = %self.locator))]
    pub fn run(self, events: Sender<PlayerEvent>) -> CompletionReason {
        let FrameProducer {
            id,
            locator,
            opener,
            frame_interval,
            pause_poll,
            control,
            stats,
        } = self;

        let reason = if control.begin() {
            match opener(&locator) {
                Ok(mut source) => {
                    info!("Playback started");
                    let reason = Playback {
                        id,
                        locator: &locator,
                        frame_interval,
                        pause_poll,
                        control: &control,
                        stats: &stats,
                        events: &events,
                    }
                    .play(source.as_mut());
                    source.close();
                    reason
                }
                Err(e) => {
                    warn!("Cannot open source: {}", e);
                    CompletionReason::SourceUnavailable
                }
            }
        } else {
            debug!("Stopped before start");
            CompletionReason::Stopped
        };

        control.stop();
        info!(
            "Playback finished ({:?}) after {} frames",
            reason,
            stats.frames_published()
        );
        metrics::counter!(
            "vidpace_players_finished_total",
            "reason" => format!("{reason:?}")
        )
        .increment(1);

        let mut finished = PlayerEvent::Finished { player: id, reason };
        loop {
            match events.send_timeout(finished, pause_poll) {
                Ok(()) => break,
                Err(SendTimeoutError::Timeout(back)) => finished = back,
                Err(SendTimeoutError::Disconnected(_)) => {
                    debug!("Presentation side gone, completion dropped");
                    break;
                }
            }
        }
        control.terminate();

        reason
    }
}

/// Borrowed state of one running loop
struct Playback<'a> {
    id: PlayerId,
    locator: &'a str,
    frame_interval: Duration,
    pause_poll: Duration,
    control: &'a PlaybackControl,
    stats: &'a PlayerStats,
    events: &'a Sender<PlayerEvent>,
}

impl Playback<'_> {
    fn play(&self, source: &mut dyn VideoSource) -> CompletionReason {
        let label = self.id.to_string();
        let frames_counter = metrics::counter!("vidpace_frames_published_total", "player" => label.clone());
        let fps_gauge = metrics::gauge!("vidpace_player_fps", "player" => label);

        let mut meter = FrameRateMeter::starting_at(Instant::now());
        loop {
            match self.control.state() {
                PlaybackState::Stopped => return CompletionReason::Stopped,
                PlaybackState::Paused => {
                    thread::sleep(self.pause_poll);
                    continue;
                }
                PlaybackState::Running => {}
            }

            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => return CompletionReason::EndOfStream,
                Err(e) => {
                    warn!("Decode failed: {}", e);
                    return CompletionReason::DecodeFailure;
                }
            };
            let frame = match convert::to_rgb24(frame, self.locator) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("Conversion failed: {}", e);
                    return CompletionReason::DecodeFailure;
                }
            };

            let fps = meter.tick();
            let sequence = frame.sequence();
            let event = PlayerEvent::Frame {
                player: self.id,
                frame,
                fps,
            };
            match self.hand_off(event) {
                HandOff::Delivered => {
                    self.stats.record_frame(fps);
                    frames_counter.increment(1);
                    fps_gauge.set(fps);
                    debug!("Published frame {} at {:.2} fps", sequence, fps);
                }
                HandOff::Cancelled => return CompletionReason::Stopped,
                HandOff::Disconnected => {
                    debug!("Presentation side gone");
                    return CompletionReason::Stopped;
                }
            }

            thread::sleep(self.frame_interval);
        }
    }

    /// Move a frame into the channel, giving up if a stop arrives while the
    /// consumer is behind
    fn hand_off(&self, mut event: PlayerEvent) -> HandOff {
        let wait = handoff_wait(self.frame_interval);
        loop {
            if self.control.is_stopped() {
                return HandOff::Cancelled;
            }
            match self.events.send_timeout(event, wait) {
                Ok(()) => return HandOff::Delivered,
                Err(SendTimeoutError::Timeout(back)) => event = back,
                Err(SendTimeoutError::Disconnected(_)) => return HandOff::Disconnected,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::TestPatternSource;
    use crate::Error;

    fn fast_config() -> PlaybackConfig {
        PlaybackConfig {
            frame_interval_ms: 2,
            pause_poll_ms: 5,
        }
    }

    fn pattern(frames: u64) -> FrameProducer {
        FrameProducer::new("testsrc", &fast_config(), move |_| {
            Ok(Box::new(TestPatternSource::new(4, 2, Some(frames))) as Box<dyn VideoSource>)
        })
    }

    #[test]
    fn meter_measures_from_start() {
        let start = Instant::now();
        let mut meter = FrameRateMeter::starting_at(start);
        let fps = meter.tick_at(start + Duration::from_millis(40));
        assert!((fps - 25.0).abs() < 1e-9);
        let fps = meter.tick_at(start + Duration::from_millis(50));
        assert!((fps - 100.0).abs() < 1e-9);
    }

    #[test]
    fn meter_never_divides_by_zero() {
        let start = Instant::now();
        let mut meter = FrameRateMeter::starting_at(start);
        let fps = meter.tick_at(start);
        assert!(fps.is_finite() && fps > 0.0);
        let fps = meter.tick_at(start);
        assert!(fps.is_finite() && fps > 0.0);
    }

    #[test]
    fn handoff_wait_never_busy_spins() {
        assert_eq!(handoff_wait(Duration::ZERO), MIN_HANDOFF_WAIT);
        assert_eq!(handoff_wait(Duration::from_millis(30)), Duration::from_millis(30));
    }

    #[test]
    fn unpaced_producer_stops_while_consumer_is_behind() {
        let config = PlaybackConfig {
            frame_interval_ms: 0,
            pause_poll_ms: 5,
        };
        let producer = FrameProducer::new("testsrc", &config, |_| {
            Ok(Box::new(TestPatternSource::new(4, 2, None)) as Box<dyn VideoSource>)
        });
        let handle = producer.handle();
        let (tx, rx) = flume::bounded(1);
        let worker = thread::spawn(move || producer.run(tx));

        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(first, PlayerEvent::Frame { .. }));
        thread::sleep(Duration::from_millis(20));
        handle.stop();

        let mut finished = 0;
        while let Ok(event) = rx.recv_timeout(Duration::from_secs(2)) {
            if matches!(event, PlayerEvent::Finished { .. }) {
                finished += 1;
            }
        }
        assert_eq!(finished, 1);
        assert_eq!(worker.join().unwrap(), CompletionReason::Stopped);
    }

    #[test]
    fn plays_to_end_of_stream_and_finishes_once() {
        let producer = pattern(3);
        let handle = producer.handle();
        let (tx, rx) = flume::unbounded();

        let reason = producer.run(tx);
        assert_eq!(reason, CompletionReason::EndOfStream);

        let events: Vec<_> = rx.drain().collect();
        assert_eq!(events.len(), 4);
        for (i, event) in events[..3].iter().enumerate() {
            match event {
                PlayerEvent::Frame { frame, fps, .. } => {
                    assert_eq!(frame.sequence(), i as u64 + 1);
                    assert_eq!(frame.format(), crate::PixelFormat::Rgb24);
                    assert!(*fps > 0.0);
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert!(matches!(
            events[3],
            PlayerEvent::Finished {
                reason: CompletionReason::EndOfStream,
                ..
            }
        ));
        assert_eq!(handle.state(), PlaybackState::Stopped);
        assert_eq!(handle.lifecycle(), crate::Lifecycle::Terminated);
        assert_eq!(handle.stats().frames_published(), 3);
    }

    #[test]
    fn unavailable_source_finishes_without_frames() {
        let producer = FrameProducer::new("missing.mjpeg", &fast_config(), |locator| {
            Err(Error::unavailable(locator, "gone"))
        });
        let (tx, rx) = flume::unbounded();

        assert_eq!(producer.run(tx), CompletionReason::SourceUnavailable);
        let events: Vec<_> = rx.drain().collect();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            PlayerEvent::Finished {
                reason: CompletionReason::SourceUnavailable,
                ..
            }
        ));
    }

    #[test]
    fn stop_before_start_skips_open() {
        let producer = FrameProducer::new("never", &fast_config(), |_| {
            panic!("source must not be opened")
        });
        producer.handle().stop();
        let (tx, rx) = flume::unbounded();

        assert_eq!(producer.run(tx), CompletionReason::Stopped);
        assert_eq!(rx.len(), 1);
    }

    #[test]
    fn dropped_receiver_ends_playback() {
        let producer = pattern(1000);
        let (tx, rx) = flume::bounded(1);
        drop(rx);
        assert_eq!(producer.run(tx), CompletionReason::Stopped);
    }
}
