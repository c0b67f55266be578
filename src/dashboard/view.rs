use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::bucket::{buckets, Aggregation, Bucket, BucketError};
use crate::graph::{edges, GraphEdge};
use crate::scale::Scale;
use crate::series::{Sample, SeriesKey};

use super::state::Shared;

/// Read-only access to the dashboard's derived data.
///
/// Every read copies what it returns; nothing handed out aliases state the
/// flush step mutates. Cheap to clone.
#[derive(Clone)]
pub struct DashboardView {
    shared: Arc<Shared>,
}

impl DashboardView {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    fn now_ms(&self) -> i64 {
        self.shared.clock.now_ms()
    }

    /// Samples of `key` from the last `window_ms`.
    pub fn current_series(&self, key: &str, window_ms: i64) -> Vec<Sample> {
        let since = self.now_ms().saturating_sub(window_ms);
        self.shared.store.window(&SeriesKey::from(key), since)
    }

    /// Axis bounds of `key`, as cached by the last flush that touched it.
    pub fn current_scale(&self, key: &str) -> Scale {
        let key = SeriesKey::from(key);
        if let Some(scale) = self.shared.scales.load().get(&key) {
            return *scale;
        }
        self.shared.compute_scale(&key, self.now_ms())
    }

    /// `key` bucketed over the last `window_ms`.
    pub fn current_buckets(
        &self,
        key: &str,
        window_ms: i64,
        bucket_width_ms: i64,
        agg: Aggregation,
    ) -> Result<Vec<Bucket>, BucketError> {
        let now = self.now_ms();
        let samples = self
            .shared
            .store
            .window(&SeriesKey::from(key), now.saturating_sub(window_ms));
        buckets(&samples, now, window_ms, bucket_width_ms, agg)
    }

    /// Category transitions over the last `window_ms`.
    ///
    /// The event log only keeps `graph.retention` worth of events, so wider
    /// windows are capped to it.
    pub fn current_edges(&self, window_ms: i64) -> Vec<GraphEdge> {
        let window_ms = window_ms.min(self.shared.graph_retention_ms);
        let now = self.now_ms();
        let events = self.shared.log.read().since(now.saturating_sub(window_ms));
        edges(&events, now, window_ms, self.shared.hot_window_ms)
    }

    /// Edges over the configured graph window.
    pub fn current_edges_default(&self) -> Vec<GraphEdge> {
        self.current_edges(self.shared.graph_window_ms)
    }

    pub fn series_keys(&self) -> Vec<SeriesKey> {
        self.shared.store.keys()
    }

    pub fn series_count(&self) -> usize {
        self.shared.store.series_count()
    }

    pub fn total_samples(&self) -> usize {
        self.shared.store.total_samples()
    }

    /// Events buffered but not yet flushed.
    pub fn pending_len(&self) -> usize {
        self.shared.pending.load(Ordering::Relaxed)
    }
}
