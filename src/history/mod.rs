//! Historical samples used to seed the store before live ingestion starts.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::HistoryConfig;
use crate::series::{Sample, SeriesKey, SeriesStore};

/// History fetch capability.
pub trait HistorySource: Send + Sync {
    /// Returns the source's name for logging.
    fn name(&self) -> &str;

    /// Fetch samples of `key` with `t >= since_ms`, in any order.
    fn fetch_history(
        &self,
        key: &SeriesKey,
        since_ms: i64,
    ) -> impl std::future::Future<Output = Result<Vec<Sample>>> + Send;
}

/// Accepted response shapes: a bare array or `{"data": [...]}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum HistoryPayload {
    Points(Vec<Sample>),
    Wrapped { data: Vec<Sample> },
}

impl HistoryPayload {
    fn into_samples(self) -> Vec<Sample> {
        match self {
            Self::Points(points) | Self::Wrapped { data: points } => points,
        }
    }
}

/// HTTP history service client.
pub struct HttpHistory {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpHistory {
    /// Create a new history client.
    pub fn new(cfg: &HistoryConfig) -> Result<Self> {
        if cfg.endpoint.is_empty() {
            bail!("history.endpoint is required for the HTTP history source");
        }

        let timeout = if cfg.timeout.is_zero() {
            Duration::from_secs(10)
        } else {
            cfg.timeout
        };

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            http,
            endpoint: cfg.endpoint.trim_end_matches('/').to_string(),
        })
    }
}

impl HistorySource for HttpHistory {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch_history(&self, key: &SeriesKey, since_ms: i64) -> Result<Vec<Sample>> {
        let url = format!("{}/api/metrics/history", self.endpoint);
        let since = since_ms.to_string();

        let response = self
            .http
            .get(&url)
            .query(&[("key", key.as_str()), ("since", since.as_str())])
            .header("Accept", "application/json")
            .send()
            .await
            .with_context(|| format!("requesting history for {key}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("unexpected status {status} fetching history for {key}: {body}");
        }

        let payload: HistoryPayload = response
            .json()
            .await
            .with_context(|| format!("decoding history for {key}"))?;

        Ok(payload.into_samples())
    }
}

/// Directory of `<key>.json` files, each holding a history array.
pub struct FileHistory {
    dir: PathBuf,
}

impl FileHistory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl HistorySource for FileHistory {
    fn name(&self) -> &str {
        "file"
    }

    async fn fetch_history(&self, key: &SeriesKey, since_ms: i64) -> Result<Vec<Sample>> {
        let name = key.as_str();
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            bail!("series key {name:?} is not a valid history file name");
        }

        let path = self.dir.join(format!("{name}.json"));
        let data = match tokio::fs::read_to_string(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no history file");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", path.display()));
            }
        };

        let payload: HistoryPayload = serde_json::from_str(&data)
            .with_context(|| format!("parsing {}", path.display()))?;

        let mut samples = payload.into_samples();
        samples.retain(|s| s.t >= since_ms);
        Ok(samples)
    }
}

/// Outcome of seeding a set of keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub seeded_keys: usize,
    pub samples: usize,
    pub failed_keys: Vec<String>,
}

/// Fetches and seeds each key. A key whose fetch or seed fails is logged
/// and skipped.
pub async fn seed_store<S: HistorySource>(
    source: &S,
    store: &SeriesStore,
    keys: &[SeriesKey],
    since_ms: i64,
) -> SeedSummary {
    let start = Instant::now();
    let mut summary = SeedSummary::default();

    for key in keys {
        let samples = match source.fetch_history(key, since_ms).await {
            Ok(samples) => samples,
            Err(e) => {
                warn!(source = source.name(), key = %key, error = %e, "history fetch failed");
                summary.failed_keys.push(key.to_string());
                continue;
            }
        };

        match store.seed(key, samples) {
            Ok(n) => {
                debug!(key = %key, samples = n, "series seeded");
                summary.seeded_keys += 1;
                summary.samples += n;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "seed rejected");
                summary.failed_keys.push(key.to_string());
            }
        }
    }

    info!(
        source = source.name(),
        keys = summary.seeded_keys,
        samples = summary.samples,
        failed = summary.failed_keys.len(),
        elapsed = ?start.elapsed(),
        "history seeding complete",
    );

    summary
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use axum::extract::Query;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    use super::*;

    #[derive(Deserialize)]
    struct HistoryQuery {
        key: String,
        since: i64,
    }

    async fn history_handler(Query(q): Query<HistoryQuery>) -> Json<Value> {
        match q.key.as_str() {
            "cpu" => Json(json!([
                {"t": q.since + 20, "v": 12.0},
                {"t": q.since + 10, "v": 10.0}
            ])),
            "memory" => Json(json!({"data": [{"timestamp": q.since, "value": 55.5}]})),
            _ => Json(json!([])),
        }
    }

    async fn serve_history() -> SocketAddr {
        let app = Router::new().route("/api/metrics/history", get(history_handler));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });
        addr
    }

    fn http_source(addr: SocketAddr) -> HttpHistory {
        HttpHistory::new(&HistoryConfig {
            endpoint: format!("http://{addr}/"),
            ..HistoryConfig::default()
        })
        .expect("valid client")
    }

    #[tokio::test]
    async fn test_http_history_shapes() {
        let addr = serve_history().await;
        let source = http_source(addr);

        let cpu = source
            .fetch_history(&SeriesKey::from("cpu"), 1_000)
            .await
            .expect("cpu history");
        assert_eq!(cpu, vec![Sample::new(1_020, 12.0), Sample::new(1_010, 10.0)]);

        let memory = source
            .fetch_history(&SeriesKey::from("memory"), 5)
            .await
            .expect("memory history");
        assert_eq!(memory, vec![Sample::new(5, 55.5)]);
    }

    #[tokio::test]
    async fn test_http_history_error_status() {
        let addr = serve_history().await;
        let source = HttpHistory::new(&HistoryConfig {
            endpoint: format!("http://{addr}/missing"),
            ..HistoryConfig::default()
        })
        .expect("valid client");

        let err = source
            .fetch_history(&SeriesKey::from("cpu"), 0)
            .await
            .expect_err("404 must fail");
        assert!(err.to_string().contains("unexpected status"));
    }

    #[test]
    fn test_http_history_requires_endpoint() {
        assert!(HttpHistory::new(&HistoryConfig::default()).is_err());
    }

    #[tokio::test]
    async fn test_file_history() {
        let dir = tempfile::tempdir().expect("temp dir");
        std::fs::write(
            dir.path().join("disk.json"),
            r#"[{"t": 1, "v": 40}, {"t": 5, "v": 41}, {"t": 9, "v": 42}]"#,
        )
        .expect("write history");

        let source = FileHistory::new(dir.path());
        let disk = source
            .fetch_history(&SeriesKey::from("disk"), 5)
            .await
            .expect("disk history");
        assert_eq!(disk, vec![Sample::new(5, 41.0), Sample::new(9, 42.0)]);

        let missing = source
            .fetch_history(&SeriesKey::from("cpu"), 0)
            .await
            .expect("missing file is empty history");
        assert!(missing.is_empty());

        assert!(source
            .fetch_history(&SeriesKey::from("../etc/passwd"), 0)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_seed_store_skips_failures() {
        let dir = tempfile::tempdir().expect("temp dir");
        std::fs::write(
            dir.path().join("cpu.json"),
            r#"[{"t": 30, "v": 3}, {"t": 10, "v": 1}, {"t": 20, "v": 2}]"#,
        )
        .expect("write history");
        std::fs::write(dir.path().join("memory.json"), "not json").expect("write history");

        let store = SeriesStore::new(100);
        let live = SeriesKey::from("disk");
        store.append(&live, Sample::new(1, 1.0));

        let keys = [
            SeriesKey::from("cpu"),
            SeriesKey::from("memory"),
            live.clone(),
        ];
        let summary = seed_store(&FileHistory::new(dir.path()), &store, &keys, 0).await;

        assert_eq!(summary.seeded_keys, 1);
        assert_eq!(summary.samples, 3);
        assert_eq!(
            summary.failed_keys,
            vec!["memory".to_string(), "disk".to_string()]
        );

        let ts: Vec<i64> = store
            .snapshot(&SeriesKey::from("cpu"))
            .iter()
            .map(|s| s.t)
            .collect();
        assert_eq!(ts, vec![10, 20, 30]);
    }
}
