//! Owner of all ingestion state and the consumer run loop.

mod state;
mod view;

pub use self::view::DashboardView;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::{Clock, FrameTicker};
use crate::config::Config;
use crate::event::Event;
use crate::history::{seed_store, HistorySource, SeedSummary};
use crate::ingest::{Batcher, FlushReport, FlushTrigger, IngestControl, IngestHandle};
use crate::series::SeriesKey;
use crate::stats::{DropReason, IngestStats};

use self::state::{DashboardState, Shared};

/// Callback receiving every non-empty flush, e.g. for duration metrics.
pub type FlushObserver = Box<dyn Fn(FlushTrigger, &FlushReport, Duration) + Send + Sync>;

/// The ingestion core: producer handle, flush loop and read API.
pub struct Dashboard {
    shared: Arc<Shared>,
    control: Arc<IngestControl>,
    handle: IngestHandle,

    /// Event channel receiver, taken by `start`.
    event_rx: Option<mpsc::Receiver<Event>>,
    frame: Arc<Notify>,
    ticker: FrameTicker,

    drain_batch: usize,
    max_pending: usize,
    observer: Option<Arc<FlushObserver>>,

    cancel: CancellationToken,
    run_task: Option<JoinHandle<()>>,
}

impl Dashboard {
    /// Creates a dashboard from validated configuration.
    pub fn new(cfg: &Config, clock: Arc<dyn Clock>) -> Result<Self> {
        let ingest = &cfg.ingest;
        let ticker = FrameTicker::new(ingest.frame_interval)?;
        let stats = Arc::new(IngestStats::new());
        let frame = Arc::new(Notify::new());

        let control = Arc::new(IngestControl::new(
            ingest.flush_interval,
            ingest.performance_flush_interval,
            ticker.paused_flag(),
        ));
        control.set_performance_mode(ingest.performance_mode);

        let (event_tx, event_rx) = mpsc::channel(ingest.channel_capacity.max(1));
        let handle = IngestHandle::new(
            event_tx,
            Arc::clone(&control),
            Arc::clone(&stats),
            Arc::clone(&frame),
        );

        {
            let frame = Arc::clone(&frame);
            ticker.on_frame(Box::new(move || frame.notify_one()));
        }

        Ok(Self {
            shared: Arc::new(Shared::new(cfg, clock, stats)),
            control,
            handle,
            event_rx: Some(event_rx),
            frame,
            ticker,
            drain_batch: ingest.drain_batch.max(1),
            max_pending: ingest.max_pending,
            observer: None,
            cancel: CancellationToken::new(),
            run_task: None,
        })
    }

    /// Set a callback invoked after every non-empty flush.
    pub fn with_flush_observer(mut self, observer: FlushObserver) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Producer handle. Cheap to clone.
    pub fn handle(&self) -> IngestHandle {
        self.handle.clone()
    }

    pub fn view(&self) -> DashboardView {
        DashboardView::new(Arc::clone(&self.shared))
    }

    pub fn stats(&self) -> Arc<IngestStats> {
        Arc::clone(&self.shared.stats)
    }

    /// Seeds `keys` with history since `since_ms`. Must run before `start`.
    pub async fn seed_from<S: HistorySource>(
        &self,
        source: &S,
        keys: &[SeriesKey],
        since_ms: i64,
    ) -> Result<SeedSummary> {
        if self.run_task.is_some() {
            bail!("history must be seeded before the dashboard starts");
        }
        Ok(seed_store(source, &self.shared.store, keys, since_ms).await)
    }

    /// Starts the frame ticker and the flush loop.
    pub fn start(&mut self) -> Result<()> {
        let Some(mut event_rx) = self.event_rx.take() else {
            bail!("dashboard already started");
        };

        let shared = Arc::clone(&self.shared);
        let control = Arc::clone(&self.control);
        let frame = Arc::clone(&self.frame);
        let cancel = self.cancel.clone();
        let observer = self.observer.clone();
        let drain_batch = self.drain_batch;
        let mut batcher = Batcher::new(self.max_pending);
        let mut state = DashboardState::new(Arc::clone(&shared));

        self.ticker.start();

        info!(
            drain_batch,
            max_pending = self.max_pending,
            flush_interval = ?control.effective_flush_interval(),
            "dashboard started",
        );

        let run_task = tokio::spawn(async move {
            let stats = Arc::clone(&shared.stats);

            let mut run_flush = |batcher: &mut Batcher, trigger: FlushTrigger| {
                let start = Instant::now();
                if let Some(report) = batcher.flush(&mut state) {
                    let elapsed = start.elapsed();
                    stats.record_flush(trigger);
                    if let Some(observer) = &observer {
                        observer(trigger, &report, elapsed);
                    }
                    debug!(
                        trigger = trigger.as_str(),
                        events = report.events,
                        samples = report.samples,
                        ?elapsed,
                        "flushed",
                    );
                }
                shared.pending.store(0, Ordering::Relaxed);
            };

            let accept = |batcher: &mut Batcher, event: Event| {
                let interval = control.effective_flush_interval();
                if !batcher.push(event, tokio::time::Instant::now(), interval) {
                    stats.record_dropped(DropReason::Overflow, 1);
                }
            };

            loop {
                let deadline = batcher.deadline();

                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        let discarded = batcher.clear();
                        shared.pending.store(0, Ordering::Relaxed);
                        if discarded > 0 {
                            stats.record_dropped(DropReason::Shutdown, discarded as u64);
                        }
                        info!(discarded, "dashboard stopped");
                        return;
                    }

                    maybe_event = event_rx.recv() => {
                        let Some(event) = maybe_event else {
                            // Every producer is gone; apply what is left.
                            run_flush(&mut batcher, FlushTrigger::Timer);
                            info!("ingest channel closed, dashboard stopped");
                            return;
                        };

                        accept(&mut batcher, event);

                        // Drain up to drain_batch-1 more events without blocking.
                        for _ in 0..drain_batch - 1 {
                            match event_rx.try_recv() {
                                Ok(event) => accept(&mut batcher, event),
                                Err(_) => break,
                            }
                        }
                        shared.pending.store(batcher.len(), Ordering::Relaxed);
                    }

                    _ = frame.notified() => {
                        run_flush(&mut batcher, FlushTrigger::Frame);
                    }

                    _ = tokio::time::sleep_until(deadline.unwrap_or_else(tokio::time::Instant::now)),
                        if deadline.is_some() =>
                    {
                        run_flush(&mut batcher, FlushTrigger::Timer);
                    }
                }
            }
        });

        self.run_task = Some(run_task);
        Ok(())
    }

    /// Stops the ticker and the flush loop; pending events are discarded.
    pub async fn stop(&mut self) {
        self.ticker.stop();
        self.cancel.cancel();

        if let Some(run_task) = self.run_task.take() {
            if let Err(e) = run_task.await {
                warn!(error = %e, "dashboard task join failed");
            }
        }
    }
}
