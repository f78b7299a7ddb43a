//! Periodic system usage sampling on its own thread.
//!
//! Collection is delegated to a [`UsageProbe`]; the sampler only schedules it and
//! forwards the result to the presentation context.

use std::fmt;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use flume::{Receiver, RecvTimeoutError, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use sysinfo::System;
use tracing::{debug, info, warn};

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UsageSample {
    pub cpu_percent: f32,
    pub ram_percent: f32,
}

impl fmt::Display for UsageSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CPU: {:.1}% | RAM: {:.1}%",
            self.cpu_percent, self.ram_percent
        )
    }
}

/// Opaque source of CPU/RAM utilisation
pub trait UsageProbe: Send {
    fn sample(&mut self) -> std::io::Result<UsageSample>;
}

/// Global CPU utilisation and used/total memory from [`sysinfo::System`].
///
/// CPU usage is a delta between two refreshes, so the first sample after
/// construction reads the interval since `new`.
pub struct SysinfoProbe {
    system: System,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        system.refresh_memory();
        Self { system }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageProbe for SysinfoProbe {
    fn sample(&mut self) -> std::io::Result<UsageSample> {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();

        let total = self.system.total_memory();
        if total == 0 {
            return Err(std::io::Error::other("total memory unknown"));
        }
        let ram = self.system.used_memory() as f64 / total as f64 * 100.0;

        Ok(UsageSample {
            cpu_percent: self.system.global_cpu_usage().clamp(0.0, 100.0),
            ram_percent: ram.clamp(0.0, 100.0) as f32,
        })
    }
}

pub struct SystemSampler {
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
    samples: Receiver<UsageSample>,
}

impl SystemSampler {
    /// Sample immediately, then every `interval`, until stopped
    pub fn spawn<P>(mut probe: P, interval: Duration) -> Result<Self>
    where
        P: UsageProbe + 'static,
    {
        let (stop_tx, stop_rx) = flume::bounded::<()>(0);
        let (sample_tx, samples) = flume::bounded(1);

        let thread = thread::Builder::new()
            .name("vidpace-sampler".into())
            .spawn(move || {
                loop {
                    match probe.sample() {
                        Ok(sample) => match sample_tx.try_send(sample) {
                            Ok(()) | Err(TrySendError::Full(_)) => {}
                            Err(TrySendError::Disconnected(_)) => break,
                        },
                        Err(e) => warn!("Usage probe failed: {}", e),
                    }
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        _ => break,
                    }
                }
                debug!("Sampler exited");
            })
            .map_err(|e| Error::Spawn("vidpace-sampler".into(), e))?;

        info!("System sampler started ({:?} interval)", interval);
        Ok(Self {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
            samples,
        })
    }

    pub fn samples(&self) -> &Receiver<UsageSample> {
        &self.samples
    }

    /// Newest pending sample, if any
    pub fn latest(&self) -> Option<UsageSample> {
        self.samples.try_iter().last()
    }

    pub fn stop(&mut self) {
        // Dropping the sender wakes the sampler immediately
        self.stop_tx.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Sampler thread panicked");
            }
        }
    }
}

impl Drop for SystemSampler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    struct Fixed;

    impl UsageProbe for Fixed {
        fn sample(&mut self) -> std::io::Result<UsageSample> {
            Ok(UsageSample {
                cpu_percent: 12.5,
                ram_percent: 40.0,
            })
        }
    }

    #[test]
    fn formats_like_status_line() {
        let sample = UsageSample {
            cpu_percent: 3.3,
            ram_percent: 61.0,
        };
        assert_eq!(sample.to_string(), "CPU: 3.3% | RAM: 61.0%");
    }

    #[test]
    fn publishes_samples_until_stopped() {
        let mut sampler = SystemSampler::spawn(Fixed, Duration::from_millis(5)).unwrap();
        let sample = sampler
            .samples()
            .recv_timeout(Duration::from_secs(2))
            .unwrap();
        assert_eq!(sample.to_string(), "CPU: 12.5% | RAM: 40.0%");

        let started = Instant::now();
        sampler.stop();
        assert!(started.elapsed() < Duration::from_secs(1));
        sampler.stop();
    }

    #[test]
    fn stop_interrupts_long_interval() {
        let mut sampler = SystemSampler::spawn(Fixed, Duration::from_secs(3600)).unwrap();
        let started = Instant::now();
        sampler.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn sysinfo_probe_reports_percentages() {
        let mut probe = SysinfoProbe::new();
        std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        let sample = probe.sample().unwrap();
        assert!((0.0..=100.0).contains(&sample.cpu_percent));
        assert!(sample.ram_percent > 0.0 && sample.ram_percent <= 100.0);
    }
}
