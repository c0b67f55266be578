//! Ingestion batching between event producers and the flush step.
//!
//! Producers hold an [`IngestHandle`] and never block: events go into a
//! bounded channel or are dropped and counted. The consumer side drains the
//! channel into a [`Batcher`], whose pending buffer is flushed by whichever
//! of the frame trigger or the safety timer fires first.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::event::Event;
use crate::stats::{DropReason, IngestStats};

/// What fired a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FlushTrigger {
    /// Render cadence (a frame tick or an explicit frame request).
    Frame = 0,
    /// Safety timer.
    Timer = 1,
}

impl FlushTrigger {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Frame => "frame",
            Self::Timer => "timer",
        }
    }
}

/// Counts produced by applying one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub events: usize,
    pub samples: usize,
    pub clamped: usize,
    pub rejected: usize,
    pub smoothed: usize,
}

/// Consumer of flushed batches.
pub trait FlushTarget {
    /// Applies a batch, in arrival order.
    fn apply(&mut self, events: Vec<Event>) -> FlushReport;
}

/// Runtime-adjustable ingestion flags shared between producers and the
/// consumer loop.
#[derive(Debug)]
pub struct IngestControl {
    flush_interval_ms: AtomicU64,
    performance_flush_interval_ms: AtomicU64,
    performance_mode: AtomicBool,
    suspended: AtomicBool,
    frame_paused: Arc<AtomicBool>,
}

impl IngestControl {
    /// `frame_paused` is the pause flag of the frame ticker; suspension
    /// pauses the render cadence too.
    pub fn new(
        flush_interval: Duration,
        performance_flush_interval: Duration,
        frame_paused: Arc<AtomicBool>,
    ) -> Self {
        Self {
            flush_interval_ms: AtomicU64::new(to_ms(flush_interval)),
            performance_flush_interval_ms: AtomicU64::new(to_ms(performance_flush_interval)),
            performance_mode: AtomicBool::new(false),
            suspended: AtomicBool::new(false),
            frame_paused,
        }
    }

    pub fn set_flush_interval(&self, interval: Duration) {
        self.flush_interval_ms
            .store(to_ms(interval), Ordering::Relaxed);
    }

    pub fn set_performance_mode(&self, on: bool) {
        self.performance_mode.store(on, Ordering::Relaxed);
    }

    pub fn set_suspended(&self, suspended: bool) {
        self.suspended.store(suspended, Ordering::Relaxed);
        self.frame_paused.store(suspended, Ordering::Relaxed);
    }

    pub fn performance_mode(&self) -> bool {
        self.performance_mode.load(Ordering::Relaxed)
    }

    pub fn suspended(&self) -> bool {
        self.suspended.load(Ordering::Relaxed)
    }

    /// Safety-timer interval currently in force.
    pub fn effective_flush_interval(&self) -> Duration {
        let ms = if self.performance_mode() {
            self.performance_flush_interval_ms.load(Ordering::Relaxed)
        } else {
            self.flush_interval_ms.load(Ordering::Relaxed)
        };
        Duration::from_millis(ms)
    }

    /// True when new events are dropped instead of queued.
    pub fn drops_events(&self) -> bool {
        self.suspended() && self.performance_mode()
    }
}

fn to_ms(d: Duration) -> u64 {
    (d.as_millis() as u64).max(1)
}

/// Result of a single [`IngestHandle::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    Dropped(DropReason),
}

/// Producer side of the ingestion pipeline. Cheap to clone.
#[derive(Clone)]
pub struct IngestHandle {
    tx: mpsc::Sender<Event>,
    control: Arc<IngestControl>,
    stats: Arc<IngestStats>,
    frame: Arc<Notify>,
    /// Set while the channel is rejecting events; shared by all clones.
    overflowing: Arc<AtomicBool>,
}

impl IngestHandle {
    pub fn new(
        tx: mpsc::Sender<Event>,
        control: Arc<IngestControl>,
        stats: Arc<IngestStats>,
        frame: Arc<Notify>,
    ) -> Self {
        Self {
            tx,
            control,
            stats,
            frame,
            overflowing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Hands an event to the consumer. Never blocks.
    pub fn push(&self, event: Event) -> PushOutcome {
        self.stats.record_received();

        if self.control.drops_events() {
            self.stats.record_dropped(DropReason::Suspended, 1);
            return PushOutcome::Dropped(DropReason::Suspended);
        }

        match self.tx.try_send(event) {
            Ok(()) => {
                self.end_overflow();
                PushOutcome::Queued
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                if self.begin_overflow() {
                    warn!("ingest channel full, dropping events until it drains");
                } else {
                    trace!("ingest channel full, dropping event");
                }
                self.stats.record_dropped(DropReason::Overflow, 1);
                PushOutcome::Dropped(DropReason::Overflow)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.stats.record_dropped(DropReason::Shutdown, 1);
                PushOutcome::Dropped(DropReason::Shutdown)
            }
        }
    }

    /// Marks the channel as overflowing. Returns true for the first drop of
    /// an overflow episode.
    fn begin_overflow(&self) -> bool {
        !self.overflowing.swap(true, Ordering::Relaxed)
    }

    fn end_overflow(&self) {
        if self.overflowing.load(Ordering::Relaxed) {
            self.overflowing.store(false, Ordering::Relaxed);
            debug!("ingest channel accepting events again");
        }
    }

    /// Asks for a flush at the next opportunity, as a frame would.
    pub fn request_frame(&self) {
        self.frame.notify_one();
    }

    pub fn set_flush_interval(&self, interval: Duration) {
        self.control.set_flush_interval(interval);
    }

    pub fn set_performance_mode(&self, on: bool) {
        self.control.set_performance_mode(on);
    }

    pub fn set_suspended(&self, suspended: bool) {
        self.control.set_suspended(suspended);
    }

    pub fn control(&self) -> &IngestControl {
        &self.control
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Owner of the pending (not yet flushed) buffer.
#[derive(Debug)]
pub struct Batcher {
    pending: VecDeque<Event>,
    max_pending: usize,
    deadline: Option<Instant>,
}

impl Batcher {
    pub fn new(max_pending: usize) -> Self {
        let max_pending = max_pending.max(1);
        Self {
            pending: VecDeque::with_capacity(max_pending.min(1024)),
            max_pending,
            deadline: None,
        }
    }

    /// Buffers an event. The safety timer is armed when the buffer goes from
    /// empty to non-empty. Returns false if the oldest pending event had to
    /// be dropped to make room.
    pub fn push(&mut self, event: Event, now: Instant, flush_interval: Duration) -> bool {
        if self.pending.is_empty() && self.deadline.is_none() {
            self.deadline = Some(now + flush_interval);
            trace!(?flush_interval, "safety timer armed");
        }

        let mut kept_all = true;
        if self.pending.len() >= self.max_pending {
            self.pending.pop_front();
            kept_all = false;
        }
        self.pending.push_back(event);
        kept_all
    }

    /// When the safety timer fires, if armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Drains the pending buffer into `target` and disarms the timer.
    ///
    /// Returns `None` (a no-op) when nothing is pending.
    pub fn flush<T: FlushTarget + ?Sized>(&mut self, target: &mut T) -> Option<FlushReport> {
        self.deadline = None;
        if self.pending.is_empty() {
            return None;
        }

        let batch: Vec<Event> = self.pending.drain(..).collect();
        Some(target.apply(batch))
    }

    /// Discards everything pending and disarms the timer. Returns how many
    /// events were discarded.
    pub fn clear(&mut self) -> usize {
        self.deadline = None;
        let n = self.pending.len();
        self.pending.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
