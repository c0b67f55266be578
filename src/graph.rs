//! Service-interaction graph inferred from temporally adjacent events.
//!
//! Edges are a pure function of the windowed event list; nothing is
//! maintained incrementally.

use std::collections::VecDeque;

use serde::Serialize;

use crate::event::{Category, CATEGORY_COUNT};

/// Default sliding window for edge inference.
pub const DEFAULT_GRAPH_WINDOW_MS: i64 = 30_000;

/// Default recency window for marking an edge hot.
pub const DEFAULT_HOT_WINDOW_MS: i64 = 2_000;

/// The minimal projection of an event the graph needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifiedEvent {
    pub ts: i64,
    pub category: Category,
    pub is_error: bool,
}

impl ClassifiedEvent {
    pub const fn new(ts: i64, category: Category, is_error: bool) -> Self {
        Self {
            ts,
            category,
            is_error,
        }
    }
}

/// A directed transition between two categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    pub from: Category,
    pub to: Category,
    pub count: u64,
    pub error_count: u64,
    pub last_ts: i64,
    pub hot: bool,
}

#[derive(Clone, Copy, Default)]
struct EdgeAcc {
    count: u64,
    error_count: u64,
    last_ts: i64,
}

/// Computes edges from the events in `[now_ms - window_ms, now_ms]`.
///
/// Events are ordered by timestamp (stable, so arrival order breaks ties).
/// Every consecutive pair with differing categories counts one transition
/// `prev -> cur`; it is an error transition when `cur` is an error. Output is
/// sorted by `(from, to)`.
pub fn edges(
    events: &[ClassifiedEvent],
    now_ms: i64,
    window_ms: i64,
    hot_window_ms: i64,
) -> Vec<GraphEdge> {
    let since = now_ms.saturating_sub(window_ms);
    let mut window: Vec<ClassifiedEvent> = events
        .iter()
        .filter(|e| e.ts >= since && e.ts <= now_ms)
        .copied()
        .collect();
    window.sort_by_key(|e| e.ts);

    let mut matrix = [[EdgeAcc::default(); CATEGORY_COUNT]; CATEGORY_COUNT];
    for pair in window.windows(2) {
        let (prev, cur) = (pair[0], pair[1]);
        if prev.category == cur.category {
            continue;
        }
        let acc = &mut matrix[prev.category.index()][cur.category.index()];
        acc.count += 1;
        if cur.is_error {
            acc.error_count += 1;
        }
        acc.last_ts = cur.ts;
    }

    let mut out = Vec::new();
    for (from, row) in Category::all().iter().zip(matrix.iter()) {
        for (to, acc) in Category::all().iter().zip(row.iter()) {
            if acc.count == 0 {
                continue;
            }
            out.push(GraphEdge {
                from: *from,
                to: *to,
                count: acc.count,
                error_count: acc.error_count,
                last_ts: acc.last_ts,
                hot: now_ms - acc.last_ts <= hot_window_ms,
            });
        }
    }
    out
}

/// Bounded log of recently classified events, the input of [`edges`].
#[derive(Debug)]
pub struct EventLog {
    events: VecDeque<ClassifiedEvent>,
    capacity: usize,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    /// Appends an event, evicting the oldest entry when full.
    pub fn record(&mut self, event: ClassifiedEvent) {
        if self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// Drops entries from the front older than `before_ts`. Returns how many
    /// were removed.
    pub fn prune(&mut self, before_ts: i64) -> usize {
        let mut removed = 0;
        while self.events.front().is_some_and(|e| e.ts < before_ts) {
            self.events.pop_front();
            removed += 1;
        }
        removed
    }

    /// Copies entries with `ts >= since_ts`, in record order.
    pub fn since(&self, since_ts: i64) -> Vec<ClassifiedEvent> {
        self.events
            .iter()
            .filter(|e| e.ts >= since_ts)
            .copied()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(ts: i64, category: Category) -> ClassifiedEvent {
        ClassifiedEvent::new(ts, category, false)
    }

    #[test]
    fn test_edges_from_runs() {
        let events = [
            ev(1_000, Category::Http),
            ev(1_100, Category::Http),
            ev(1_200, Category::Database),
            ev(1_300, Category::Database),
            ev(1_400, Category::Ai),
        ];
        let out = edges(&events, 2_000, DEFAULT_GRAPH_WINDOW_MS, DEFAULT_HOT_WINDOW_MS);
        assert_eq!(out.len(), 2);

        let http_db = out
            .iter()
            .find(|e| e.from == Category::Http && e.to == Category::Database)
            .expect("http -> database edge");
        assert_eq!(http_db.count, 1);
        assert_eq!(http_db.last_ts, 1_200);

        let db_ai = out
            .iter()
            .find(|e| e.from == Category::Database && e.to == Category::Ai)
            .expect("database -> ai edge");
        assert_eq!(db_ai.count, 1);
    }

    #[test]
    fn test_repeat_transitions_accumulate() {
        let events = [
            ev(1, Category::Http),
            ev(2, Category::Database),
            ev(3, Category::Http),
            ev(4, Category::Database),
        ];
        let out = edges(&events, 10, 100, 100);
        let http_db = out
            .iter()
            .find(|e| e.from == Category::Http && e.to == Category::Database)
            .expect("edge");
        assert_eq!(http_db.count, 2);
        assert_eq!(http_db.last_ts, 4);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_error_count_follows_destination() {
        let events = [
            ev(1, Category::Scraping),
            ClassifiedEvent::new(2, Category::Database, true),
            ClassifiedEvent::new(3, Category::Scraping, true),
        ];
        let out = edges(&events, 10, 100, 100);
        for e in &out {
            assert_eq!(e.error_count, 1, "{e:?}");
        }
    }

    #[test]
    fn test_window_excludes_old_events() {
        let events = [ev(0, Category::Http), ev(50_000, Category::Database)];
        assert!(edges(&events, 60_000, 30_000, 2_000).is_empty());
    }

    #[test]
    fn test_events_are_time_ordered() {
        let events = [
            ev(3, Category::Ai),
            ev(1, Category::Http),
            ev(2, Category::Database),
        ];
        let out = edges(&events, 10, 100, 100);
        let pairs: Vec<_> = out.iter().map(|e| (e.from, e.to)).collect();
        assert_eq!(
            pairs,
            vec![
                (Category::Http, Category::Database),
                (Category::Database, Category::Ai)
            ]
        );
    }

    #[test]
    fn test_hot_marking() {
        let events = [
            ev(1_000, Category::Http),
            ev(2_000, Category::Database),
            ev(9_000, Category::Ai),
        ];
        let out = edges(&events, 10_000, 30_000, 2_000);
        let hot: Vec<_> = out.iter().map(|e| (e.to, e.hot)).collect();
        assert_eq!(hot, vec![(Category::Database, false), (Category::Ai, true)]);
    }

    #[test]
    fn test_event_log_bounds_and_prune() {
        let mut log = EventLog::new(3);
        for ts in 0..5 {
            log.record(ev(ts, Category::Other));
        }
        assert_eq!(log.len(), 3);
        assert_eq!(log.prune(3), 1);
        assert_eq!(log.since(0).len(), 2);
        assert_eq!(log.since(4).len(), 1);
    }
}
