use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Wall-clock source, in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// A clock that only moves when told to. Used by tests and replays.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now.store(now_ms, Ordering::Relaxed);
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as i64, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::Relaxed)
    }
}

/// Callback invoked on every rendered frame.
pub type FrameFn = Box<dyn Fn() + Send + Sync>;

/// Render-cadence ticker.
///
/// Fires registered callbacks once per frame interval while not paused. A
/// paused ticker keeps running but skips callbacks, the way a hidden display
/// stops delivering animation frames.
pub struct FrameTicker {
    interval: Duration,
    callbacks: Arc<parking_lot::Mutex<Vec<FrameFn>>>,
    paused: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for FrameTicker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameTicker")
            .field("interval", &self.interval)
            .field("paused", &self.is_paused())
            .finish()
    }
}

impl FrameTicker {
    /// Create a new ticker firing every `interval`.
    pub fn new(interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            bail!("frame interval must be > 0");
        }

        Ok(Self {
            interval,
            callbacks: Arc::new(parking_lot::Mutex::new(Vec::with_capacity(2))),
            paused: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Register a callback that fires on every unpaused frame.
    pub fn on_frame(&self, f: FrameFn) {
        self.callbacks.lock().push(f);
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    /// Shared pause flag, for components that toggle the ticker without
    /// owning it.
    pub fn paused_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.paused)
    }

    /// Start the background frame task.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return; // Already running.
        }

        let interval = self.interval;
        let callbacks = Arc::clone(&self.callbacks);
        let paused = Arc::clone(&self.paused);
        let cancel = self.cancel.clone();

        info!(?interval, "frame ticker started");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("frame ticker stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if paused.load(Ordering::Relaxed) {
                            continue;
                        }

                        let cbs = callbacks.lock();
                        for cb in cbs.iter() {
                            cb();
                        }
                    }
                }
            }
        });
    }

    /// Stop the background task.
    pub fn stop(&self) {
        self.cancel.cancel();
        self.running.store(false, Ordering::SeqCst);
    }
}
