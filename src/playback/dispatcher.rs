//! Runs each producer on its own execution context and marshals events to the
//! presentation context

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use flume::{Receiver, RecvError, Selector};
use tracing::{debug, error, info, warn};

use super::events::{CompletionReason, PlayerEvent};
use super::handle::PlayerHandle;
use super::producer::FrameProducer;
use super::state::{Lifecycle, PlayerId};
use crate::{DispatcherConfig, Error, Result};

const SHUTDOWN_POLL: Duration = Duration::from_millis(5);

struct Worker {
    handle: PlayerHandle,
    /// `None` once retired; nothing is delivered after that
    events: Option<Receiver<PlayerEvent>>,
    thread: Option<JoinHandle<CompletionReason>>,
}

impl Worker {
    /// Drop the channel and join the thread
    fn retire(&mut self) {
        self.events = None;
        if let Some(thread) = self.thread.take() {
            match thread.join() {
                Ok(reason) => debug!(player = %self.handle.id(), "Joined ({:?})", reason),
                Err(_) => {
                    error!(player = %self.handle.id(), "Producer thread panicked");
                    self.handle.abandon();
                }
            }
        }
    }
}

pub struct Dispatcher {
    config: DispatcherConfig,
    workers: Vec<Worker>,
    /// Rotates the first channel polled so a busy player cannot starve the rest
    cursor: usize,
    shut_down: bool,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        Self {
            config,
            workers: Vec::new(),
            cursor: 0,
            shut_down: false,
        }
    }

    /// Start `producer` on a dedicated thread and return its control handle
    pub fn submit(&mut self, producer: FrameProducer) -> Result<PlayerHandle> {
        let handle = producer.handle();
        let name = format!("{}-{}", self.config.thread_name_prefix, handle.id().0);
        if self.shut_down {
            return Err(Error::Spawn(
                name,
                std::io::Error::other("dispatcher is shut down"),
            ));
        }

        let (tx, rx) = flume::bounded(self.config.event_capacity);
        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || producer.run(tx))
            .map_err(|e| {
                handle.stop();
                Error::Spawn(name.clone(), e)
            })?;

        info!(
            player = %handle.id(),
            "Submitted {} on thread {}",
            handle.locator(),
            name
        );
        self.workers.push(Worker {
            handle: handle.clone(),
            events: Some(rx),
            thread: Some(thread),
        });
        Ok(handle)
    }

    pub fn handle(&self, id: PlayerId) -> Option<PlayerHandle> {
        self.worker(id).map(|w| w.handle.clone())
    }

    pub fn handles(&self) -> impl Iterator<Item = &PlayerHandle> {
        self.workers.iter().map(|w| &w.handle)
    }

    pub fn lifecycle(&self, id: PlayerId) -> Option<Lifecycle> {
        self.worker(id).map(|w| w.handle.lifecycle())
    }

    /// Players whose completion has not been received yet
    pub fn live_players(&self) -> usize {
        self.workers.iter().filter(|w| w.events.is_some()).count()
    }

    /// Request a cooperative stop of one player. Its `Finished` event still arrives.
    pub fn stop(&self, id: PlayerId) -> bool {
        self.worker(id).is_some_and(|w| w.handle.stop())
    }

    fn worker(&self, id: PlayerId) -> Option<&Worker> {
        self.workers.iter().find(|w| w.handle.id() == id)
    }

    /// Wait up to `timeout` for the next event from any live player.
    ///
    /// Events of one player arrive in emission order. A player is retired (thread
    /// joined, channel dropped) once its `Finished` event has been returned.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Option<PlayerEvent> {
        let live: Vec<usize> = (0..self.workers.len())
            .filter(|&i| self.workers[i].events.is_some())
            .collect();
        if live.is_empty() {
            return None;
        }
        let start = self.cursor % live.len();
        self.cursor = self.cursor.wrapping_add(1);

        let (index, received) = {
            let mut selector = Selector::new();
            for k in 0..live.len() {
                let index = live[(start + k) % live.len()];
                if let Some(rx) = &self.workers[index].events {
                    selector = selector.recv(rx, move |res| (index, res));
                }
            }
            selector.wait_timeout(timeout).ok()?
        };

        match received {
            Ok(event) => {
                if let PlayerEvent::Finished { reason, .. } = &event {
                    info!(player = %event.player(), "Completed ({:?})", reason);
                    self.workers[index].retire();
                }
                Some(event)
            }
            Err(RecvError::Disconnected) => {
                let worker = &mut self.workers[index];
                let player = worker.handle.id();
                warn!(player = %player, "Channel closed without completion");
                worker.retire();
                worker.handle.abandon();

                let reason = CompletionReason::DecodeFailure;
                metrics::counter!(
                    "vidpace_players_finished_total",
                    "reason" => format!("{reason:?}")
                )
                .increment(1);
                Some(PlayerEvent::Finished { player, reason })
            }
        }
    }

    /// Stop every player, drop all channels and wait (bounded) for the threads.
    /// Safe to call more than once and after players have completed.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        for worker in &self.workers {
            worker.handle.stop();
        }
        // Blocked sends fail from here on
        for worker in &mut self.workers {
            worker.events = None;
        }

        let deadline = Instant::now() + self.config.shutdown_timeout();
        for worker in &mut self.workers {
            let Some(thread) = worker.thread.take() else {
                continue;
            };
            while !thread.is_finished() && Instant::now() < deadline {
                thread::sleep(SHUTDOWN_POLL);
            }
            if thread.is_finished() {
                worker.thread = Some(thread);
                worker.retire();
            } else {
                warn!(
                    player = %worker.handle.id(),
                    "Did not quiesce within {:?}, detaching",
                    self.config.shutdown_timeout()
                );
            }
        }
        info!("Dispatcher shut down ({} players)", self.workers.len());
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
