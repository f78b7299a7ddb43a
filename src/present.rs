//! Presentation context: drains player events and usage samples on one thread

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::monitor::{SystemSampler, UsageSample};
use crate::playback::{CompletionReason, Dispatcher, PlayerEvent, PlayerId};
use crate::source::Frame;

/// Receives everything the presentation context would render
pub trait Presenter {
    fn on_frame(&mut self, player: PlayerId, frame: &Frame, fps: f64);

    fn on_finished(&mut self, _player: PlayerId, _reason: CompletionReason) {}

    fn on_usage(&mut self, _sample: &UsageSample) {}
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct PresentSummary {
    pub frames: u64,
    pub finished: Vec<(PlayerId, CompletionReason)>,
}

/// Pump events into `presenter` until every player has finished or `shutdown` is set
pub fn run<P: Presenter>(
    dispatcher: &mut Dispatcher,
    sampler: Option<&SystemSampler>,
    presenter: &mut P,
    shutdown: &AtomicBool,
    poll: Duration,
) -> PresentSummary {
    let mut summary = PresentSummary::default();

    while !shutdown.load(Ordering::Acquire) && dispatcher.live_players() > 0 {
        match dispatcher.recv_timeout(poll) {
            Some(PlayerEvent::Frame { player, frame, fps }) => {
                summary.frames += 1;
                presenter.on_frame(player, &frame, fps);
            }
            Some(PlayerEvent::Finished { player, reason }) => {
                summary.finished.push((player, reason));
                presenter.on_finished(player, reason);
            }
            None => {}
        }

        if let Some(sample) = sampler.and_then(SystemSampler::latest) {
            presenter.on_usage(&sample);
        }
    }

    debug!(
        "Presentation loop done: {} frames, {} completions",
        summary.frames,
        summary.finished.len()
    );
    summary
}

#[derive(Debug)]
struct PlayerView {
    frames: u64,
    fps: f64,
    width: u32,
    height: u32,
    last_report: Instant,
}

/// Renders to the log: a per-player status line at most once per `report_every`
pub struct LogPresenter {
    report_every: Duration,
    players: HashMap<PlayerId, PlayerView>,
    usage: Option<UsageSample>,
}

impl LogPresenter {
    pub fn new(report_every: Duration) -> Self {
        Self {
            report_every,
            players: HashMap::new(),
            usage: None,
        }
    }

    pub fn fps_label(&self, player: PlayerId) -> Option<String> {
        self.players
            .get(&player)
            .map(|view| format!("FPS: {:.2}", view.fps))
    }

    pub fn usage_label(&self) -> Option<String> {
        self.usage.map(|sample| sample.to_string())
    }

    pub fn frames(&self, player: PlayerId) -> u64 {
        self.players.get(&player).map_or(0, |view| view.frames)
    }
}

impl Presenter for LogPresenter {
    fn on_frame(&mut self, player: PlayerId, frame: &Frame, fps: f64) {
        let now = Instant::now();
        let report_every = self.report_every;
        let view = self.players.entry(player).or_insert_with(|| PlayerView {
            frames: 0,
            fps: 0.0,
            width: 0,
            height: 0,
            last_report: now.checked_sub(report_every).unwrap_or(now),
        });
        view.frames += 1;
        view.fps = fps;
        view.width = frame.meta.width;
        view.height = frame.meta.height;

        if now.duration_since(view.last_report) >= report_every {
            view.last_report = now;
            info!(
                "{} {}x{} FPS: {:.2} (frame {})",
                player,
                view.width,
                view.height,
                view.fps,
                frame.sequence()
            );
        }
    }

    fn on_finished(&mut self, player: PlayerId, reason: CompletionReason) {
        let frames = self.frames(player);
        info!("{} finished ({:?}) after {} frames", player, reason, frames);
    }

    fn on_usage(&mut self, sample: &UsageSample) {
        info!("{}", sample);
        self.usage = Some(*sample);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::PixelFormat;

    #[test]
    fn log_presenter_tracks_labels() {
        let mut presenter = LogPresenter::new(Duration::from_secs(60));
        let player = PlayerId(1);
        assert_eq!(presenter.fps_label(player), None);

        let frame = Frame::packed(1, 2, 2, PixelFormat::Rgb24, vec![0u8; 12]);
        presenter.on_frame(player, &frame, 29.971);
        presenter.on_frame(player, &frame, 30.0);
        presenter.on_usage(&UsageSample {
            cpu_percent: 10.0,
            ram_percent: 20.0,
        });

        assert_eq!(presenter.fps_label(player).as_deref(), Some("FPS: 30.00"));
        assert_eq!(presenter.frames(player), 2);
        assert_eq!(
            presenter.usage_label().as_deref(),
            Some("CPU: 10.0% | RAM: 20.0%")
        );
    }

    #[test]
    fn run_returns_immediately_without_players() {
        let mut dispatcher = Dispatcher::new(crate::DispatcherConfig::default());
        let mut presenter = LogPresenter::new(Duration::from_secs(1));
        let summary = run(
            &mut dispatcher,
            None,
            &mut presenter,
            &AtomicBool::new(false),
            Duration::from_millis(10),
        );
        assert_eq!(summary, PresentSummary::default());
    }
}
