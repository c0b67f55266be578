use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

use opsboard::clock::{Clock, SystemClock};
use opsboard::config::Config;
use opsboard::dashboard::{Dashboard, DashboardView};
use opsboard::event::wire::decode_line;
use opsboard::export::health::HealthMetrics;
use opsboard::history::{FileHistory, HttpHistory};
use opsboard::ingest::{IngestHandle, PushOutcome};
use opsboard::series::SeriesKey;
use opsboard::stats::IngestStats;

/// Live dashboard ingestion core fed by NDJSON events.
#[derive(Parser)]
#[command(name = "opsboard", about)]
struct Cli {
    /// Path to the YAML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    /// Overrides `log_level` from the config file.
    #[arg(long)]
    log_level: Option<String>,

    /// NDJSON event input file, or "-" for stdin.
    #[arg(short, long, default_value = "-")]
    input: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information and exit.
    Version,
}

mod version {
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Full version string with platform info.
    pub fn full() -> String {
        format!(
            "{} ({}/{})",
            RELEASE,
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Command::Version) = &cli.command {
        println!("opsboard {}", version::full());
        return Ok(());
    }

    let cfg = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };

    let log_level = cli.log_level.as_deref().unwrap_or(&cfg.log_level);
    let filter = EnvFilter::try_new(log_level)
        .with_context(|| format!("invalid log level: {log_level}"))?;

    fmt().with_env_filter(filter).with_target(true).init();

    tracing::info!(version = version::RELEASE, input = %cli.input, "starting opsboard");

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(async { run(cfg, cli.input).await })
}

async fn run(cfg: Config, input: String) -> Result<()> {
    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let health = Arc::new(HealthMetrics::new(&cfg.health.addr)?);
    health.start().await?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let observer_health = Arc::clone(&health);
    let mut dashboard = Dashboard::new(&cfg, Arc::clone(&clock))?.with_flush_observer(Box::new(
        move |_trigger, report, elapsed| observer_health.observe_flush(report, elapsed),
    ));

    if cfg.history.enabled() {
        let keys: Vec<SeriesKey> = cfg
            .history
            .keys
            .iter()
            .map(|k| SeriesKey::from(k.as_str()))
            .collect();
        let since_ms = clock.now_ms() - cfg.history.lookback.as_millis() as i64;

        let summary = match &cfg.history.directory {
            Some(dir) => {
                dashboard
                    .seed_from(&FileHistory::new(dir), &keys, since_ms)
                    .await?
            }
            None => {
                dashboard
                    .seed_from(&HttpHistory::new(&cfg.history)?, &keys, since_ms)
                    .await?
            }
        };
        if !summary.failed_keys.is_empty() {
            tracing::warn!(keys = ?summary.failed_keys, "some series started without history");
        }
    }

    dashboard.start()?;

    let reader = {
        let handle = dashboard.handle();
        let stats = dashboard.stats();
        let clock = Arc::clone(&clock);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let result = if input == "-" {
                read_events(tokio::io::stdin(), handle, &stats, clock, shutdown).await
            } else {
                match tokio::fs::File::open(&input).await {
                    Ok(file) => read_events(file, handle, &stats, clock, shutdown).await,
                    Err(e) => Err(e).with_context(|| format!("opening input {input}")),
                }
            };
            if let Err(e) = result {
                tracing::error!(error = %e, "event reader failed");
            }
        })
    };

    let reporter = {
        let view = dashboard.view();
        let stats = dashboard.stats();
        let health = Arc::clone(&health);
        let shutdown = shutdown.clone();
        let interval = cfg.report_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = ticker.tick() => report(&view, &stats, &health),
                }
            }
        })
    };

    shutdown.cancelled().await;

    reader.abort();
    dashboard.stop().await;
    if let Err(e) = reporter.await {
        tracing::warn!(error = %e, "reporter task join failed");
    }
    report(&dashboard.view(), &dashboard.stats(), &health);
    health.stop().await?;

    tracing::info!("opsboard stopped");

    Ok(())
}

/// Cancels `shutdown` on SIGINT or SIGTERM.
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {
                            tracing::info!("received SIGINT, shutting down");
                        }
                        _ = sigterm.recv() => {
                            tracing::info!("received SIGTERM, shutting down");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "registering SIGTERM handler failed");
                    let _ = tokio::signal::ctrl_c().await;
                    tracing::info!("received SIGINT, shutting down");
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("received SIGINT, shutting down");
        }

        shutdown.cancel();
    });
}

/// Decodes NDJSON lines from `input` and pushes them until EOF or shutdown.
async fn read_events<R: AsyncRead + Unpin>(
    input: R,
    handle: IngestHandle,
    stats: &IngestStats,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut lines = BufReader::new(input).lines();
    let mut line_no = 0u64;

    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            line = lines.next_line() => line.context("reading event input")?,
        };
        let Some(line) = line else {
            tracing::info!(lines = line_no, "event input exhausted");
            return Ok(());
        };
        line_no += 1;

        if line.trim().is_empty() {
            continue;
        }

        match decode_line(&line, clock.now_ms()) {
            Ok(event) => {
                if let PushOutcome::Dropped(reason) = handle.push(event) {
                    tracing::trace!(line = line_no, reason = reason.as_str(), "event dropped");
                }
            }
            Err(e) => {
                stats.record_malformed();
                tracing::warn!(line = line_no, error = %e, "skipping malformed event");
            }
        }
    }
}

/// Publishes a stats delta to Prometheus and logs a summary line.
fn report(view: &DashboardView, stats: &IngestStats, health: &HealthMetrics) {
    let snap = stats.snapshot();
    health.record_stats(&snap);

    let series = view.series_count();
    let samples = view.total_samples();
    let pending = view.pending_len();
    let hot_edges = view
        .current_edges_default()
        .iter()
        .filter(|e| e.hot)
        .count();

    health.series.set(series as f64);
    health.stored_samples.set(samples as f64);
    health.pending_events.set(pending as f64);
    health.hot_edges.set(hot_edges as f64);

    tracing::info!(
        received = snap.received,
        dropped = snap.dropped_total(),
        malformed = snap.malformed,
        rejected = snap.rejected,
        smoothed = snap.smoothed,
        series,
        samples,
        pending,
        hot_edges,
        "ingest report",
    );
}
