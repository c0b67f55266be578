use std::sync::Arc;
use std::time::Duration;

use opsboard::bucket::Aggregation;
use opsboard::clock::ManualClock;
use opsboard::config::Config;
use opsboard::dashboard::Dashboard;
use opsboard::event::wire::decode_line;
use opsboard::event::Category;
use opsboard::filter::SeriesRule;
use opsboard::history::FileHistory;
use opsboard::ingest::{IngestHandle, PushOutcome};
use opsboard::series::SeriesKey;

const NOW: i64 = 100_000;

fn config() -> Config {
    let mut cfg = Config::default();
    cfg.ingest.frame_interval = Duration::from_secs(3600);
    cfg
}

fn started(cfg: &Config) -> Dashboard {
    let mut dash = Dashboard::new(cfg, Arc::new(ManualClock::new(NOW))).expect("valid config");
    dash.start().expect("start");
    dash
}

/// Pushes NDJSON lines as a transport would, then forces a frame flush.
async fn feed(handle: &IngestHandle, lines: &[String]) {
    for line in lines {
        let event = decode_line(line, NOW).expect("valid event line");
        assert_eq!(handle.push(event), PushOutcome::Queued);
    }
    handle.request_frame();
    tokio::time::sleep(Duration::from_millis(5)).await;
}

fn line(kind: &str, ts: i64, data: &str) -> String {
    format!(r#"{{"type":"{kind}","timestamp":{ts},"data":{data}}}"#)
}

#[tokio::test(start_paused = true)]
async fn cpu_spike_is_smoothed() {
    let mut cfg = config();
    cfg.series.insert(
        "cpu".to_string(),
        SeriesRule::percentage().with_smooth(60.0),
    );
    let mut dash = started(&cfg);
    let view = dash.view();

    let lines: Vec<String> = [(1_000, 10), (2_000, 90), (3_000, 10)]
        .iter()
        .map(|(ts, usage)| line("systemMetrics", *ts, &format!(r#"{{"cpu":{{"usage":{usage}}}}}"#)))
        .collect();
    feed(&dash.handle(), &lines).await;

    let values: Vec<f64> = view
        .current_series("cpu", NOW)
        .iter()
        .map(|s| s.v)
        .collect();
    assert_eq!(values, vec![10.0, 50.0, 10.0]);
    assert_eq!(dash.stats().snapshot().smoothed, 1);

    dash.stop().await;
}

#[tokio::test(start_paused = true)]
async fn category_sequence_yields_transition_edges() {
    let mut dash = started(&config());
    let view = dash.view();

    let lines: Vec<String> = [
        ("httpMetrics", 99_000),
        ("httpMetrics", 99_100),
        ("databaseMetrics", 99_200),
        ("databaseMetrics", 99_300),
        ("aiMetrics", 99_400),
    ]
    .iter()
    .map(|(kind, ts)| line(kind, *ts, "{}"))
    .collect();
    feed(&dash.handle(), &lines).await;

    let edges: Vec<_> = view
        .current_edges_default()
        .iter()
        .map(|e| (e.from, e.to, e.count, e.hot))
        .collect();
    assert_eq!(
        edges,
        vec![
            (Category::Http, Category::Database, 1, true),
            (Category::Database, Category::Ai, 1, true),
        ]
    );

    dash.stop().await;
}

#[tokio::test(start_paused = true)]
async fn seeded_history_precedes_live_samples() {
    let dir = tempfile::tempdir().expect("temp dir");
    std::fs::write(
        dir.path().join("cpu.json"),
        r#"[{"t": 2000, "v": 6}, {"t": 1000, "v": 5}]"#,
    )
    .expect("write history");

    let mut dash = Dashboard::new(&config(), Arc::new(ManualClock::new(NOW))).expect("valid config");
    let summary = dash
        .seed_from(&FileHistory::new(dir.path()), &[SeriesKey::from("cpu")], 0)
        .await
        .expect("seed");
    assert_eq!(summary.samples, 2);
    dash.start().expect("start");
    let view = dash.view();

    let lines = vec![
        // Older than the seeded tail: clamped forward, never reordered.
        line("systemMetrics", 1_500, r#"{"cpu":{"usage":7}}"#),
        line("systemMetrics", 3_000, r#"{"cpu":{"usage":8}}"#),
    ];
    feed(&dash.handle(), &lines).await;

    let series = view.current_series("cpu", NOW);
    let ts: Vec<i64> = series.iter().map(|s| s.t).collect();
    let values: Vec<f64> = series.iter().map(|s| s.v).collect();
    assert_eq!(ts, vec![1_000, 2_000, 2_000, 3_000]);
    assert_eq!(values, vec![5.0, 6.0, 7.0, 8.0]);

    dash.stop().await;
}

#[tokio::test(start_paused = true)]
async fn series_never_exceed_capacity() {
    let mut cfg = config();
    cfg.store.default_capacity = 5;
    let mut dash = started(&cfg);
    let view = dash.view();

    let lines: Vec<String> = (0..20)
        .map(|i| line("httpMetrics", 50_000 + i * 100, &format!(r#"{{"activeRequests":{i}}}"#)))
        .collect();
    feed(&dash.handle(), &lines).await;

    let values: Vec<f64> = view
        .current_series("httpActive", NOW)
        .iter()
        .map(|s| s.v)
        .collect();
    assert_eq!(values, vec![15.0, 16.0, 17.0, 18.0, 19.0]);
    assert_eq!(view.current_series("events.http", NOW).len(), 5);

    dash.stop().await;
}

#[tokio::test(start_paused = true)]
async fn empty_buckets_are_zero() {
    let mut dash = started(&config());
    let view = dash.view();

    feed(
        &dash.handle(),
        &[line("httpMetrics", NOW - 500, r#"{"activeRequests":7}"#)],
    )
    .await;

    let values: Vec<f64> = view
        .current_buckets("httpActive", 4_000, 1_000, Aggregation::Avg)
        .expect("valid buckets")
        .iter()
        .map(|b| b.value)
        .collect();
    assert_eq!(values, vec![0.0, 0.0, 0.0, 7.0]);

    dash.stop().await;
}

#[tokio::test(start_paused = true)]
async fn malformed_lines_do_not_stop_ingestion() {
    let mut dash = started(&config());
    let view = dash.view();
    let handle = dash.handle();

    let input = [
        "not json".to_string(),
        "[1, 2, 3]".to_string(),
        line("mystery", NOW - 100, r#""something happened""#),
        line("httpMetrics", NOW - 50, r#"{"activeRequests":3}"#),
    ];
    let mut malformed = 0;
    for raw in &input {
        match decode_line(raw, NOW) {
            Ok(event) => {
                handle.push(event);
            }
            Err(_) => malformed += 1,
        }
    }
    handle.request_frame();
    tokio::time::sleep(Duration::from_millis(5)).await;

    assert_eq!(malformed, 2);
    assert_eq!(view.current_series("httpActive", NOW).len(), 1);
    assert_eq!(view.current_series("events.other", NOW).len(), 1);

    dash.stop().await;
}
