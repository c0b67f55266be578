use std::collections::{HashMap, HashSet};
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::trace;

use crate::clock::Clock;
use crate::config::Config;
use crate::event::classify::classify;
use crate::event::extract::{activity_key, extract, is_error};
use crate::event::Event;
use crate::filter::{validate, RuleSet, Verdict};
use crate::graph::{ClassifiedEvent, EventLog};
use crate::ingest::{FlushReport, FlushTarget};
use crate::scale::{scale, Scale};
use crate::series::{Sample, SeriesKey, SeriesStore};
use crate::stats::IngestStats;

/// State shared between the flush step (the only writer) and readers.
pub(crate) struct Shared {
    pub store: SeriesStore,
    pub rules: RuleSet,
    /// Scales recomputed after each flush, replaced wholesale.
    pub scales: ArcSwap<HashMap<SeriesKey, Scale>>,
    pub log: parking_lot::RwLock<EventLog>,
    pub clock: Arc<dyn Clock>,
    pub stats: Arc<IngestStats>,
    /// Pending buffer length, published by the run loop.
    pub pending: AtomicUsize,
    pub padding_pct: f64,
    pub scale_window_ms: i64,
    pub graph_window_ms: i64,
    /// Age beyond which classified events are pruned from the log.
    pub graph_retention_ms: i64,
    pub hot_window_ms: i64,
}

impl Shared {
    pub fn new(cfg: &Config, clock: Arc<dyn Clock>, stats: Arc<IngestStats>) -> Self {
        let store = cfg.store.summary_keys.iter().fold(
            SeriesStore::new(cfg.store.default_capacity),
            |store, key| store.with_capacity_for(key.as_str(), cfg.store.summary_capacity),
        );

        Self {
            store,
            rules: RuleSet::with_overrides(&cfg.series),
            scales: ArcSwap::from_pointee(HashMap::new()),
            log: parking_lot::RwLock::new(EventLog::new(cfg.graph.log_capacity)),
            clock,
            stats,
            pending: AtomicUsize::new(0),
            padding_pct: cfg.scale.padding_pct,
            scale_window_ms: cfg.scale.window.as_millis() as i64,
            graph_window_ms: cfg.graph.window.as_millis() as i64,
            graph_retention_ms: cfg.graph.retention.as_millis() as i64,
            hot_window_ms: cfg.graph.hot_window.as_millis() as i64,
        }
    }

    /// Computes the scale of `key` from its recent values.
    pub fn compute_scale(&self, key: &SeriesKey, now_ms: i64) -> Scale {
        let samples = self.store.window(key, now_ms - self.scale_window_ms);
        scale(&samples, self.rules.for_key(key).scale, self.padding_pct)
    }
}

/// The flush step: classification, validation, store mutation and
/// recomputation of cached scales.
pub(crate) struct DashboardState {
    shared: Arc<Shared>,
    touched: HashSet<SeriesKey>,
    classified: Vec<ClassifiedEvent>,
}

impl DashboardState {
    pub fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            touched: HashSet::with_capacity(32),
            classified: Vec::with_capacity(256),
        }
    }

    fn apply_event(&mut self, event: &Event, report: &mut FlushReport) {
        let shared = &*self.shared;
        let ts = event.timestamp_ms;

        let category = classify(event);
        shared.stats.record_category(category);
        self.classified
            .push(ClassifiedEvent::new(ts, category, is_error(event)));

        let activity = activity_key(category);
        shared.store.append(&activity, Sample::new(ts, 1.0));
        self.touched.insert(activity);
        report.samples += 1;

        for (key, raw) in extract(event) {
            let previous = shared.store.tail(&key).map(|s| s.v);
            let verdict = validate(shared.rules.for_key(&key), raw, previous);

            match verdict {
                Verdict::Clamped(_) => {
                    shared.stats.record_clamped();
                    report.clamped += 1;
                }
                Verdict::Rejected(_) => {
                    shared.stats.record_rejected();
                    report.rejected += 1;
                }
                Verdict::Smoothed(_) => {
                    shared.stats.record_smoothed();
                    report.smoothed += 1;
                }
                Verdict::Accepted(_) | Verdict::Absent => {}
            }

            if let Some(v) = verdict.value() {
                shared.store.append(&key, Sample::new(ts, v));
                self.touched.insert(key);
                report.samples += 1;
            }
        }
    }

    fn refresh_scales(&mut self, now_ms: i64) {
        if self.touched.is_empty() {
            return;
        }

        let shared = &*self.shared;
        let mut scales = HashMap::clone(&shared.scales.load());
        for key in self.touched.drain() {
            let s = shared.compute_scale(&key, now_ms);
            scales.insert(key, s);
        }
        shared.scales.store(Arc::new(scales));
    }
}

impl FlushTarget for DashboardState {
    fn apply(&mut self, events: Vec<Event>) -> FlushReport {
        let mut report = FlushReport {
            events: events.len(),
            ..FlushReport::default()
        };

        for event in &events {
            self.apply_event(event, &mut report);
        }

        let now_ms = self.shared.clock.now_ms();
        {
            let mut log = self.shared.log.write();
            for ev in self.classified.drain(..) {
                log.record(ev);
            }
            log.prune(now_ms - self.shared.graph_retention_ms);
        }

        self.refresh_scales(now_ms);
        self.shared.stats.record_samples(report.samples as u64);

        trace!(
            events = report.events,
            samples = report.samples,
            rejected = report.rejected,
            smoothed = report.smoothed,
            "batch applied"
        );

        report
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::clock::ManualClock;
    use crate::event::{Category, SourceKind};
    use crate::stats::StatsSnapshot;

    fn shared(now: i64) -> Arc<Shared> {
        Arc::new(Shared::new(
            &Config::default(),
            Arc::new(ManualClock::new(now)),
            Arc::new(IngestStats::new()),
        ))
    }

    fn cpu(ts: i64, usage: f64) -> Event {
        Event::new(SourceKind::SystemMetrics, ts, json!({"cpu": {"usage": usage}}))
    }

    #[test]
    fn test_apply_stores_samples_and_activity() {
        let shared = shared(10_000);
        let mut state = DashboardState::new(Arc::clone(&shared));

        let report = state.apply(vec![
            cpu(1_000, 20.0),
            Event::new(SourceKind::Log, 2_000, json!("sqlite busy")),
        ]);
        assert_eq!(report.events, 2);
        assert_eq!(report.samples, 3);

        let key = SeriesKey::from("cpu");
        assert_eq!(shared.store.tail(&key), Some(Sample::new(1_000, 20.0)));
        assert_eq!(shared.store.len(&activity_key(Category::System)), 1);
        assert_eq!(shared.store.len(&activity_key(Category::Database)), 1);
        assert_eq!(shared.log.read().len(), 2);
    }

    #[test]
    fn test_apply_counts_verdicts() {
        let shared = shared(10_000);
        let mut state = DashboardState::new(Arc::clone(&shared));

        let mem = |ts, usage| {
            Event::new(SourceKind::SystemMetrics, ts, json!({"memory": {"usage": usage}}))
        };
        let report = state.apply(vec![mem(1, 50.0), mem(2, 110.0), mem(3, 120.0)]);
        // 110 rejected against 50; 120 rejected against the reused 50.
        assert_eq!(report.rejected, 2);

        let values: Vec<f64> = shared
            .store
            .snapshot(&SeriesKey::from("memory"))
            .iter()
            .map(|s| s.v)
            .collect();
        assert_eq!(values, vec![50.0, 50.0, 50.0]);

        let snap: StatsSnapshot = shared.stats.snapshot();
        assert_eq!(snap.rejected, 2);
        assert_eq!(snap.category(Category::System), 3);
    }

    #[test]
    fn test_apply_refreshes_scale_cache() {
        let shared = shared(10_000);
        let mut state = DashboardState::new(Arc::clone(&shared));

        state.apply(vec![cpu(9_000, 50.0), cpu(9_500, 50.0)]);
        let scales = shared.scales.load();
        assert_eq!(
            scales.get(&SeriesKey::from("cpu")),
            Some(&Scale::new(46.0, 54.0))
        );
    }

    #[test]
    fn test_apply_prunes_event_log_past_retention() {
        let shared = shared(1_000_000);
        let mut state = DashboardState::new(Arc::clone(&shared));

        // Retention is 5m: 999s stays, 1s goes.
        state.apply(vec![cpu(1_000, 1.0), cpu(999_000, 1.0)]);
        assert_eq!(shared.log.read().len(), 1);
    }

    #[test]
    fn test_apply_keeps_events_older_than_graph_window() {
        let shared = shared(100_000);
        let mut state = DashboardState::new(Arc::clone(&shared));

        state.apply(vec![cpu(40_000, 1.0), cpu(99_000, 1.0)]);
        assert_eq!(shared.log.read().len(), 2);
    }
}
