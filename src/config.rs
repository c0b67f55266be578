use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::filter::SeriesRule;

/// Top-level configuration for opsboard.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Logging verbosity (debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Producer/consumer hand-off and flush cadence.
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Series store capacities.
    #[serde(default)]
    pub store: StoreConfig,

    /// Per-series filter and scale rules, keyed by series key. Entries
    /// replace the built-in rule for that key.
    #[serde(default)]
    pub series: HashMap<String, SeriesRule>,

    /// Dynamic scale configuration.
    #[serde(default)]
    pub scale: ScaleConfig,

    /// Service graph configuration.
    #[serde(default)]
    pub graph: GraphConfig,

    /// Startup history seeding.
    #[serde(default)]
    pub history: HistoryConfig,

    /// Prometheus health metrics server configuration.
    #[serde(default)]
    pub health: HealthConfig,

    /// How often the binary logs a summary line. Default: 10s.
    #[serde(default = "default_report_interval", with = "humantime_serde")]
    pub report_interval: Duration,
}

/// Ingestion configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Bounded producer channel size. Default: 65536.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Maximum events moved from the channel per wake-up. Default: 256.
    #[serde(default = "default_drain_batch")]
    pub drain_batch: usize,

    /// Maximum pending (unflushed) events; oldest dropped beyond. Default: 20000.
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,

    /// Safety-timer interval. Default: 90ms.
    #[serde(default = "default_flush_interval", with = "humantime_serde")]
    pub flush_interval: Duration,

    /// Safety-timer interval in performance mode. Default: 250ms.
    #[serde(default = "default_performance_flush_interval", with = "humantime_serde")]
    pub performance_flush_interval: Duration,

    /// Render cadence. Default: 16ms (about 60 Hz).
    #[serde(default = "default_frame_interval", with = "humantime_serde")]
    pub frame_interval: Duration,

    /// Start in performance mode. Default: false.
    #[serde(default)]
    pub performance_mode: bool,
}

/// Series store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Capacity of raw series. Default: 7200 (2h at 1 Hz).
    #[serde(default = "default_capacity")]
    pub default_capacity: usize,

    /// Capacity of summary series. Default: 288.
    #[serde(default = "default_summary_capacity")]
    pub summary_capacity: usize,

    /// Keys stored at `summary_capacity`.
    #[serde(default)]
    pub summary_keys: Vec<String>,
}

/// Dynamic scale configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ScaleConfig {
    /// Symmetric padding as a percentage of the value range. Default: 10.
    #[serde(default = "default_padding_pct")]
    pub padding_pct: f64,

    /// How far back scales look for values. Default: 5m.
    #[serde(default = "default_scale_window", with = "humantime_serde")]
    pub window: Duration,
}

/// Service graph configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphConfig {
    /// Sliding window edges are inferred from. Default: 30s.
    #[serde(default = "default_graph_window", with = "humantime_serde")]
    pub window: Duration,

    /// Recency window for hot edges. Default: 2s.
    #[serde(default = "default_hot_window", with = "humantime_serde")]
    pub hot_window: Duration,

    /// How long classified events are kept for edge queries. Bounds the
    /// widest window `current_edges` can serve. Default: 5m.
    #[serde(default = "default_graph_retention", with = "humantime_serde")]
    pub retention: Duration,

    /// Maximum classified events retained for edge inference. Default: 10000.
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
}

/// History seeding configuration. At most one of `endpoint` and
/// `directory` may be set; with neither, seeding is skipped.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    /// History service base URL (e.g. "http://localhost:3000").
    #[serde(default)]
    pub endpoint: String,

    /// Directory of `<key>.json` history files.
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// Request timeout. Default: 10s.
    #[serde(default = "default_history_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// How far back to seed. Default: 2h.
    #[serde(default = "default_lookback", with = "humantime_serde")]
    pub lookback: Duration,

    /// Series to seed.
    #[serde(default = "default_history_keys")]
    pub keys: Vec<String>,
}

impl HistoryConfig {
    pub fn enabled(&self) -> bool {
        !self.endpoint.is_empty() || self.directory.is_some()
    }
}

/// Prometheus health metrics server configuration.
#[derive(Debug, Deserialize)]
pub struct HealthConfig {
    /// Listen address. Default: ":9090".
    #[serde(default = "default_health_addr")]
    pub addr: String,
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_report_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_channel_capacity() -> usize {
    65536
}

fn default_drain_batch() -> usize {
    256
}

fn default_max_pending() -> usize {
    20_000
}

fn default_flush_interval() -> Duration {
    Duration::from_millis(90)
}

fn default_performance_flush_interval() -> Duration {
    Duration::from_millis(250)
}

fn default_frame_interval() -> Duration {
    Duration::from_millis(16)
}

fn default_capacity() -> usize {
    7200
}

fn default_summary_capacity() -> usize {
    288
}

fn default_padding_pct() -> f64 {
    crate::scale::DEFAULT_PADDING_PCT
}

fn default_scale_window() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_graph_window() -> Duration {
    Duration::from_millis(crate::graph::DEFAULT_GRAPH_WINDOW_MS as u64)
}

fn default_hot_window() -> Duration {
    Duration::from_millis(crate::graph::DEFAULT_HOT_WINDOW_MS as u64)
}

fn default_graph_retention() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_log_capacity() -> usize {
    10_000
}

fn default_history_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_lookback() -> Duration {
    Duration::from_secs(2 * 60 * 60)
}

fn default_history_keys() -> Vec<String> {
    ["cpu", "memory", "memoryUsedGb", "disk"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_health_addr() -> String {
    ":9090".to_string()
}

// --- Default trait impls ---

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            ingest: IngestConfig::default(),
            store: StoreConfig::default(),
            series: HashMap::new(),
            scale: ScaleConfig::default(),
            graph: GraphConfig::default(),
            history: HistoryConfig::default(),
            health: HealthConfig::default(),
            report_interval: default_report_interval(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            drain_batch: default_drain_batch(),
            max_pending: default_max_pending(),
            flush_interval: default_flush_interval(),
            performance_flush_interval: default_performance_flush_interval(),
            frame_interval: default_frame_interval(),
            performance_mode: false,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            default_capacity: default_capacity(),
            summary_capacity: default_summary_capacity(),
            summary_keys: Vec::new(),
        }
    }
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self {
            padding_pct: default_padding_pct(),
            window: default_scale_window(),
        }
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            window: default_graph_window(),
            hot_window: default_hot_window(),
            retention: default_graph_retention(),
            log_capacity: default_log_capacity(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            directory: None,
            timeout: default_history_timeout(),
            lookback: default_lookback(),
            keys: default_history_keys(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            addr: default_health_addr(),
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for consistency.
    pub fn validate(&self) -> Result<()> {
        let ingest = &self.ingest;
        if ingest.channel_capacity == 0 {
            bail!("ingest.channel_capacity must be positive");
        }
        if ingest.drain_batch == 0 {
            bail!("ingest.drain_batch must be positive");
        }
        if ingest.max_pending == 0 {
            bail!("ingest.max_pending must be positive");
        }
        if ingest.flush_interval.is_zero() {
            bail!("ingest.flush_interval must be positive");
        }
        if ingest.performance_flush_interval.is_zero() {
            bail!("ingest.performance_flush_interval must be positive");
        }
        if ingest.frame_interval.is_zero() {
            bail!("ingest.frame_interval must be positive");
        }

        if self.store.default_capacity == 0 {
            bail!("store.default_capacity must be positive");
        }
        if self.store.summary_capacity == 0 {
            bail!("store.summary_capacity must be positive");
        }

        for (key, rule) in &self.series {
            if key.is_empty() {
                bail!("series keys must not be empty");
            }
            if let Some([lo, hi]) = rule.clamp {
                if !(lo < hi) {
                    bail!("series.{key}.clamp min {lo} must be less than max {hi}");
                }
            }
            for (name, threshold) in [
                ("reject_threshold", rule.reject_threshold),
                ("smooth_threshold", rule.smooth_threshold),
            ] {
                if threshold.is_some_and(|t| !(t >= 0.0) || !t.is_finite()) {
                    bail!("series.{key}.{name} must be a non-negative number");
                }
            }
        }

        if !(self.scale.padding_pct >= 0.0) || !self.scale.padding_pct.is_finite() {
            bail!("scale.padding_pct must be a non-negative number");
        }
        if self.scale.window.is_zero() {
            bail!("scale.window must be positive");
        }

        if self.graph.window.is_zero() {
            bail!("graph.window must be positive");
        }
        if self.graph.hot_window > self.graph.window {
            bail!(
                "graph.hot_window {:?} must not exceed graph.window {:?}",
                self.graph.hot_window,
                self.graph.window
            );
        }
        if self.graph.retention < self.graph.window {
            bail!(
                "graph.retention {:?} must not be shorter than graph.window {:?}",
                self.graph.retention,
                self.graph.window
            );
        }
        if self.graph.log_capacity == 0 {
            bail!("graph.log_capacity must be positive");
        }

        if !self.history.endpoint.is_empty() && self.history.directory.is_some() {
            bail!("history.endpoint and history.directory are mutually exclusive");
        }
        if self.history.enabled() && self.history.timeout.is_zero() {
            bail!("history.timeout must be positive");
        }

        if self.report_interval.is_zero() {
            bail!("report_interval must be positive");
        }

        Ok(())
    }
}
