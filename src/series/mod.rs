//! Bounded per-key numeric time series.
//!
//! The store is single-writer (the flush step) and multi-reader. Readers copy
//! the samples they need while holding the shard read lock, so no reader ever
//! holds a reference a later append can mutate.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable identifier naming one numeric stream (e.g. `cpu`, `httpActive`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesKey(Arc<str>);

impl SeriesKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SeriesKey {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl From<String> for SeriesKey {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for SeriesKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// One timestamped value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Milliseconds since the Unix epoch.
    #[serde(alias = "timestamp")]
    pub t: i64,
    #[serde(alias = "value")]
    pub v: f64,
}

impl Sample {
    pub const fn new(t: i64, v: f64) -> Self {
        Self { t, v }
    }
}

/// Errors returned by the series store.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum StoreError {
    #[error("series {key} already received live samples; seed must run before live ingestion")]
    SeedAfterLive { key: String },
}

/// Result of a single append.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppendOutcome {
    /// The oldest sample was evicted to stay within capacity.
    pub evicted: bool,
    /// The timestamp was older than the tail and was clamped to it.
    pub clamped: bool,
}

/// Capacity-bounded, append-ordered sample sequence.
#[derive(Debug, Clone)]
pub struct Series {
    samples: VecDeque<Sample>,
    capacity: usize,
    live: bool,
}

impl Series {
    /// Creates an empty series. A zero capacity is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            live: false,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends a sample, clamping an out-of-order timestamp to the tail and
    /// evicting the oldest sample on overflow.
    pub fn push(&mut self, mut sample: Sample) -> AppendOutcome {
        let mut outcome = AppendOutcome::default();

        if let Some(tail) = self.samples.back() {
            if sample.t < tail.t {
                sample.t = tail.t;
                outcome.clamped = true;
            }
        }

        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
            outcome.evicted = true;
        }

        self.samples.push_back(sample);
        self.live = true;
        outcome
    }

    pub fn tail(&self) -> Option<Sample> {
        self.samples.back().copied()
    }

    /// Copies all samples with `t >= since_ts`.
    pub fn window(&self, since_ts: i64) -> Vec<Sample> {
        let start = self.samples.partition_point(|s| s.t < since_ts);
        self.samples.range(start..).copied().collect()
    }

    /// Copies every stored sample.
    pub fn to_vec(&self) -> Vec<Sample> {
        self.samples.iter().copied().collect()
    }

    /// Replaces the content with sorted historical samples.
    fn load_seed(&mut self, mut samples: Vec<Sample>) -> usize {
        samples.retain(|s| s.v.is_finite());
        samples.sort_by_key(|s| s.t);

        let skip = samples.len().saturating_sub(self.capacity);
        self.samples.clear();
        self.samples.extend(samples.into_iter().skip(skip));
        self.samples.len()
    }
}

/// Owner of every series, keyed by [`SeriesKey`].
pub struct SeriesStore {
    series: DashMap<SeriesKey, Series>,
    default_capacity: usize,
    capacity_overrides: HashMap<SeriesKey, usize>,
}

impl SeriesStore {
    /// Creates a store where every key gets `default_capacity`.
    pub fn new(default_capacity: usize) -> Self {
        Self {
            series: DashMap::with_capacity(32),
            default_capacity,
            capacity_overrides: HashMap::new(),
        }
    }

    /// Sets a per-key capacity, e.g. for lower-resolution summary series.
    ///
    /// Only applies to series created after the call.
    pub fn with_capacity_for(mut self, key: impl Into<SeriesKey>, capacity: usize) -> Self {
        self.capacity_overrides.insert(key.into(), capacity);
        self
    }

    /// Returns the capacity a series for `key` is (or would be) created with.
    pub fn capacity_for(&self, key: &SeriesKey) -> usize {
        self.capacity_overrides
            .get(key)
            .copied()
            .unwrap_or(self.default_capacity)
    }

    /// Appends one live sample to `key`, creating the series on first use.
    pub fn append(&self, key: &SeriesKey, sample: Sample) -> AppendOutcome {
        if let Some(mut series) = self.series.get_mut(key) {
            return series.push(sample);
        }

        self.series
            .entry(key.clone())
            .or_insert_with(|| Series::new(self.capacity_for(key)))
            .push(sample)
    }

    /// Returns the most recent sample of `key`.
    pub fn tail(&self, key: &SeriesKey) -> Option<Sample> {
        self.series.get(key).and_then(|s| s.tail())
    }

    /// Copies the samples of `key` with `t >= since_ts`.
    pub fn window(&self, key: &SeriesKey, since_ts: i64) -> Vec<Sample> {
        self.series
            .get(key)
            .map(|s| s.window(since_ts))
            .unwrap_or_default()
    }

    /// Copies every sample of `key`.
    pub fn snapshot(&self, key: &SeriesKey) -> Vec<Sample> {
        self.series
            .get(key)
            .map(|s| s.to_vec())
            .unwrap_or_default()
    }

    /// Bulk-loads historical samples for `key`, sorted once.
    ///
    /// Must run before the first live append for the key; afterwards the
    /// concatenation order "seed, then live" could no longer be guaranteed.
    /// Returns the number of samples retained after capacity trimming.
    pub fn seed(&self, key: &SeriesKey, samples: Vec<Sample>) -> Result<usize, StoreError> {
        let mut series = self
            .series
            .entry(key.clone())
            .or_insert_with(|| Series::new(self.capacity_for(key)));

        if series.live {
            return Err(StoreError::SeedAfterLive {
                key: key.to_string(),
            });
        }

        Ok(series.load_seed(samples))
    }

    /// Returns all keys, sorted.
    pub fn keys(&self) -> Vec<SeriesKey> {
        let mut keys: Vec<SeriesKey> = self.series.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Number of samples stored for `key`.
    pub fn len(&self, key: &SeriesKey) -> usize {
        self.series.get(key).map(|s| s.len()).unwrap_or(0)
    }

    /// Number of series.
    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    /// Total samples across all series.
    pub fn total_samples(&self) -> usize {
        self.series.iter().map(|e| e.value().len()).sum()
    }
}
