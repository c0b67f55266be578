use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::event::Category;
use crate::ingest::{FlushReport, FlushTrigger};
use crate::stats::{DropReason, StatsSnapshot};

const NAMESPACE: &str = "opsboard";

/// Prometheus metrics for ingestion health.
///
/// All metrics use the "opsboard" namespace. Counters are fed from
/// [`StatsSnapshot`] deltas; gauges are set from the read API.
pub struct HealthMetrics {
    registry: Registry,
    addr: String,
    shutdown: parking_lot::Mutex<Option<CancellationToken>>,

    /// Total events handed to the ingest handle.
    pub events_received: Counter,
    /// Events dropped before reaching the store, by reason.
    pub events_dropped: CounterVec,
    /// Input lines that were not valid events.
    pub events_malformed: Counter,
    /// Events flushed, by category.
    pub events_by_category: CounterVec,
    /// Samples appended to the store.
    pub samples_stored: Counter,
    /// Samples clamped to their domain.
    pub samples_clamped: Counter,
    /// Samples rejected as anomalous.
    pub samples_rejected: Counter,
    /// Samples smoothed.
    pub samples_smoothed: Counter,
    /// Non-empty flushes, by trigger.
    pub flushes: CounterVec,
    /// Flush duration (10us-100ms buckets).
    pub flush_duration: Histogram,
    /// Events per flush.
    pub flush_batch_size: Histogram,
    /// Events buffered but not yet flushed.
    pub pending_events: Gauge,
    /// Samples held across all series.
    pub stored_samples: Gauge,
    /// Number of series.
    pub series: Gauge,
    /// Hot edges in the current service graph.
    pub hot_edges: Gauge,
}

impl HealthMetrics {
    /// Creates a new health metrics instance with all metrics registered.
    pub fn new(addr: &str) -> Result<Self> {
        let registry = Registry::new();

        let events_received = Counter::with_opts(
            Opts::new("events_received_total", "Total events pushed by producers.")
                .namespace(NAMESPACE),
        )?;
        let events_dropped = CounterVec::new(
            Opts::new(
                "events_dropped_total",
                "Total events dropped before reaching the store, by reason.",
            )
            .namespace(NAMESPACE),
            &["reason"],
        )?;
        let events_malformed = Counter::with_opts(
            Opts::new(
                "events_malformed_total",
                "Total input lines that could not be decoded as events.",
            )
            .namespace(NAMESPACE),
        )?;
        let events_by_category = CounterVec::new(
            Opts::new(
                "events_by_category_total",
                "Total events flushed, by category.",
            )
            .namespace(NAMESPACE),
            &["category"],
        )?;
        let samples_stored = Counter::with_opts(
            Opts::new("samples_stored_total", "Total samples appended to series.")
                .namespace(NAMESPACE),
        )?;
        let samples_clamped = Counter::with_opts(
            Opts::new(
                "samples_clamped_total",
                "Total samples clamped to their series domain.",
            )
            .namespace(NAMESPACE),
        )?;
        let samples_rejected = Counter::with_opts(
            Opts::new(
                "samples_rejected_total",
                "Total samples rejected as anomalous jumps.",
            )
            .namespace(NAMESPACE),
        )?;
        let samples_smoothed = Counter::with_opts(
            Opts::new(
                "samples_smoothed_total",
                "Total samples replaced by a smoothed value.",
            )
            .namespace(NAMESPACE),
        )?;
        let flushes = CounterVec::new(
            Opts::new("flushes_total", "Total non-empty flushes, by trigger.").namespace(NAMESPACE),
            &["trigger"],
        )?;
        let flush_duration = Histogram::with_opts(
            HistogramOpts::new(
                "flush_duration_seconds",
                "Time to apply one batch to the store.",
            )
            .namespace(NAMESPACE)
            .buckets(vec![0.00001, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.1]),
        )?;
        let flush_batch_size = Histogram::with_opts(
            HistogramOpts::new("flush_batch_size", "Number of events per flush.")
                .namespace(NAMESPACE)
                .buckets(vec![1.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0, 20000.0]),
        )?;
        let pending_events = Gauge::with_opts(
            Opts::new("pending_events", "Events buffered but not yet flushed.")
                .namespace(NAMESPACE),
        )?;
        let stored_samples = Gauge::with_opts(
            Opts::new("stored_samples", "Samples held across all series.").namespace(NAMESPACE),
        )?;
        let series = Gauge::with_opts(
            Opts::new("series", "Number of series in the store.").namespace(NAMESPACE),
        )?;
        let hot_edges = Gauge::with_opts(
            Opts::new("hot_edges", "Hot edges in the current service graph.")
                .namespace(NAMESPACE),
        )?;

        registry.register(Box::new(events_received.clone()))?;
        registry.register(Box::new(events_dropped.clone()))?;
        registry.register(Box::new(events_malformed.clone()))?;
        registry.register(Box::new(events_by_category.clone()))?;
        registry.register(Box::new(samples_stored.clone()))?;
        registry.register(Box::new(samples_clamped.clone()))?;
        registry.register(Box::new(samples_rejected.clone()))?;
        registry.register(Box::new(samples_smoothed.clone()))?;
        registry.register(Box::new(flushes.clone()))?;
        registry.register(Box::new(flush_duration.clone()))?;
        registry.register(Box::new(flush_batch_size.clone()))?;
        registry.register(Box::new(pending_events.clone()))?;
        registry.register(Box::new(stored_samples.clone()))?;
        registry.register(Box::new(series.clone()))?;
        registry.register(Box::new(hot_edges.clone()))?;

        Ok(Self {
            registry,
            addr: addr.to_string(),
            shutdown: parking_lot::Mutex::new(None),
            events_received,
            events_dropped,
            events_malformed,
            events_by_category,
            samples_stored,
            samples_clamped,
            samples_rejected,
            samples_smoothed,
            flushes,
            flush_duration,
            flush_batch_size,
            pending_events,
            stored_samples,
            series,
            hot_edges,
        })
    }

    /// Adds the counter deltas of one stats snapshot.
    pub fn record_stats(&self, snap: &StatsSnapshot) {
        self.events_received.inc_by(snap.received as f64);
        self.events_malformed.inc_by(snap.malformed as f64);
        self.samples_stored.inc_by(snap.samples as f64);
        self.samples_clamped.inc_by(snap.clamped as f64);
        self.samples_rejected.inc_by(snap.rejected as f64);
        self.samples_smoothed.inc_by(snap.smoothed as f64);

        for reason in DropReason::ALL {
            let n = snap.dropped(reason);
            if n > 0 {
                self.events_dropped
                    .with_label_values(&[reason.as_str()])
                    .inc_by(n as f64);
            }
        }

        for trigger in [FlushTrigger::Frame, FlushTrigger::Timer] {
            let n = snap.flushes(trigger);
            if n > 0 {
                self.flushes
                    .with_label_values(&[trigger.as_str()])
                    .inc_by(n as f64);
            }
        }

        for category in Category::all() {
            let n = snap.category(*category);
            if n > 0 {
                self.events_by_category
                    .with_label_values(&[category.as_str()])
                    .inc_by(n as f64);
            }
        }
    }

    /// Records one flush.
    pub fn observe_flush(&self, report: &FlushReport, elapsed: Duration) {
        self.flush_duration.observe(elapsed.as_secs_f64());
        self.flush_batch_size.observe(report.events as f64);
    }

    /// Renders all metrics in the Prometheus text format.
    pub fn render(&self) -> Result<String> {
        render_registry(&self.registry)
    }

    /// Starts the HTTP server serving /metrics and /healthz.
    pub async fn start(&self) -> Result<()> {
        let addr = if self.addr.is_empty() {
            ":9090"
        } else {
            &self.addr
        };

        // Parse address, handling ":port" shorthand.
        let bind_addr = if addr.starts_with(':') {
            format!("0.0.0.0{addr}")
        } else {
            addr.to_string()
        };

        let registry = self.registry.clone();
        let app_state = Arc::new(AppState { registry });

        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/healthz", get(healthz_handler))
            .with_state(app_state);

        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("listening on {bind_addr}"))?;

        let local_addr = listener.local_addr().context("getting local address")?;

        let cancel = CancellationToken::new();
        *self.shutdown.lock() = Some(cancel.clone());

        tokio::spawn(async move {
            tracing::info!(addr = %local_addr, "health metrics server started");

            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
            })
            .await;

            if let Err(e) = result {
                tracing::error!(error = %e, "health metrics server error");
            }
        });

        Ok(())
    }

    /// Gracefully shuts down the health metrics server.
    pub async fn stop(&self) -> Result<()> {
        if let Some(cancel) = self.shutdown.lock().take() {
            cancel.cancel();
        }

        Ok(())
    }
}

fn render_registry(registry: &Registry) -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&registry.gather(), &mut buffer)
        .context("encoding metrics")?;
    String::from_utf8(buffer).context("converting metrics to string")
}

/// Shared state for axum handlers.
struct AppState {
    registry: Registry,
}

/// GET /metrics - Prometheus text format.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match render_registry(&state.registry) {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => {
            tracing::error!(error = %e, "rendering metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "encoding error".to_string(),
            )
        }
    }
}

/// GET /healthz - Simple health check.
async fn healthz_handler() -> &'static str {
    "ok"
}
