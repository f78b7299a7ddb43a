//! vidpace: play several video sources concurrently, each on its own thread

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use color_eyre::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vidpace::monitor::{SysinfoProbe, SystemSampler};
use vidpace::present::{self, LogPresenter, PresentSummary};
use vidpace::{CompletionReason, Config, Dispatcher, FrameProducer};

#[derive(Debug, Parser)]
#[command(name = "vidpace", version, about)]
struct Cli {
    /// `.mjpeg` files, image directories, stills or `testsrc:<frames>[:<w>x<h>]`
    #[arg(required = true)]
    sources: Vec<PathBuf>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Play every source this many times side by side
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    copies: u32,

    /// Skip the CPU/RAM sampler
    #[arg(long)]
    no_monitor: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    init_tracing()?;

    let cli = Cli::parse();
    info!("vidpace launching...");

    let config = Config::load(cli.config.as_deref())?;

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, stopping players");
                shutdown.store(true, Ordering::Release);
            }
        });
    }

    // The presentation loop blocks on channel selects, keep it off the async workers
    let summary = tokio::task::spawn_blocking(move || play(cli, config, &shutdown)).await??;

    let unavailable = summary
        .finished
        .iter()
        .filter(|(_, reason)| *reason == CompletionReason::SourceUnavailable)
        .count();
    if unavailable > 0 {
        warn!("{} source(s) could not be opened", unavailable);
    }
    info!(
        "vidpace shutting down: {} frames presented, {} players finished",
        summary.frames,
        summary.finished.len()
    );
    Ok(())
}

fn play(cli: Cli, config: Config, shutdown: &AtomicBool) -> Result<PresentSummary> {
    let mut dispatcher = Dispatcher::new(config.dispatcher.clone());
    for path in &cli.sources {
        for _ in 0..cli.copies {
            dispatcher.submit(FrameProducer::from_path(path, &config.playback))?;
        }
    }

    let sampler = if config.monitor.enabled && !cli.no_monitor {
        start_sampler(&config)?
    } else {
        None
    };

    let mut presenter = LogPresenter::new(Duration::from_secs(1));
    let summary = present::run(
        &mut dispatcher,
        sampler.as_ref(),
        &mut presenter,
        shutdown,
        config.playback.pause_poll(),
    );

    dispatcher.shutdown();
    Ok(summary)
}

fn start_sampler(config: &Config) -> Result<Option<SystemSampler>> {
    let probe = SysinfoProbe::new();
    Ok(Some(SystemSampler::spawn(probe, config.monitor.interval())?))
}

fn init_tracing() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vidpace=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .with_timer(tracing_subscriber::fmt::time::uptime());

    #[cfg(feature = "profiling")]
    {
        use tracing_subscriber::layer::SubscriberExt;
        let subscriber = builder
            .finish()
            .with(tracing_tracy::TracyLayer::default());
        tracing::subscriber::set_global_default(subscriber)?;
    }
    #[cfg(not(feature = "profiling"))]
    builder.init();

    Ok(())
}
