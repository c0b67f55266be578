use std::sync::atomic::{AtomicU64, Ordering};

use crate::event::{Category, CATEGORY_COUNT};
use crate::ingest::FlushTrigger;

/// Why an event never reached the series store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DropReason {
    /// Ingestion suspended in performance mode.
    Suspended = 0,
    /// Channel or pending buffer full.
    Overflow = 1,
    /// Pushed after shutdown, or cleared from the buffer on shutdown.
    Shutdown = 2,
}

const DROP_REASON_COUNT: usize = 3;

impl DropReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Suspended => "suspended",
            Self::Overflow => "overflow",
            Self::Shutdown => "shutdown",
        }
    }

    pub const ALL: [Self; DROP_REASON_COUNT] = [Self::Suspended, Self::Overflow, Self::Shutdown];
}

/// Lock-free ingestion counters.
///
/// `snapshot()` atomically reads and resets all counters, making it
/// suitable for periodic reporting without contention.
pub struct IngestStats {
    received: AtomicU64,
    dropped: [AtomicU64; DROP_REASON_COUNT],
    malformed: AtomicU64,
    clamped: AtomicU64,
    rejected: AtomicU64,
    smoothed: AtomicU64,
    samples: AtomicU64,
    flushes: [AtomicU64; 2],
    categories: [AtomicU64; CATEGORY_COUNT],
}

/// Counter values since the previous snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received: u64,
    /// Indexed by `DropReason as usize`.
    pub dropped: [u64; DROP_REASON_COUNT],
    pub malformed: u64,
    pub clamped: u64,
    pub rejected: u64,
    pub smoothed: u64,
    pub samples: u64,
    /// Indexed by `FlushTrigger as usize`.
    pub flushes: [u64; 2],
    /// Indexed by `Category::index`.
    pub categories: [u64; CATEGORY_COUNT],
}

impl StatsSnapshot {
    pub fn dropped(&self, reason: DropReason) -> u64 {
        self.dropped[reason as usize]
    }

    pub fn dropped_total(&self) -> u64 {
        self.dropped.iter().sum()
    }

    pub fn flushes(&self, trigger: FlushTrigger) -> u64 {
        self.flushes[trigger as usize]
    }

    pub fn category(&self, category: Category) -> u64 {
        self.categories[category.index()]
    }
}

impl IngestStats {
    /// Create a new zeroed IngestStats.
    pub fn new() -> Self {
        Self {
            received: AtomicU64::new(0),
            dropped: std::array::from_fn(|_| AtomicU64::new(0)),
            malformed: AtomicU64::new(0),
            clamped: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            smoothed: AtomicU64::new(0),
            samples: AtomicU64::new(0),
            flushes: std::array::from_fn(|_| AtomicU64::new(0)),
            categories: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, reason: DropReason, n: u64) {
        self.dropped[reason as usize].fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_clamped(&self) {
        self.clamped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_smoothed(&self) {
        self.smoothed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_samples(&self, n: u64) {
        self.samples.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_flush(&self, trigger: FlushTrigger) {
        self.flushes[trigger as usize].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_category(&self, category: Category) {
        self.categories[category.index()].fetch_add(1, Ordering::Relaxed);
    }

    /// Atomically read and reset all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        let take = |c: &AtomicU64| c.swap(0, Ordering::Relaxed);

        StatsSnapshot {
            received: take(&self.received),
            dropped: std::array::from_fn(|i| take(&self.dropped[i])),
            malformed: take(&self.malformed),
            clamped: take(&self.clamped),
            rejected: take(&self.rejected),
            smoothed: take(&self.smoothed),
            samples: take(&self.samples),
            flushes: std::array::from_fn(|i| take(&self.flushes[i])),
            categories: std::array::from_fn(|i| take(&self.categories[i])),
        }
    }
}

impl Default for IngestStats {
    fn default() -> Self {
        Self::new()
    }
}
