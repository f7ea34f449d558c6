//! Batch Writer
//!
//! Accumulates observations and persists them in one transaction per flush.
//!
//! # Lifecycle
//!
//! ```text
//! IDLE --enqueue--> ACCUMULATING (timer armed)
//!   ACCUMULATING --size reached | timer fired | flush()--> FLUSHING
//!   FLUSHING --commit | requeue | drop--> IDLE
//! ```
//!
//! The buffer is swapped out under the state lock before any I/O starts, so
//! a size trigger and a timer firing at the same moment can never write the
//! same rows twice. Only one transaction is in flight at a time.
//!
//! Every swapped-out batch is counted as in flight until its transaction
//! has committed or its rows are requeued, so `drain` can wait for batches
//! that left the buffer before it was called.
//!
//! # Failure Policy
//!
//! A failed flush rolls back and puts its rows back at the head of the buffer
//! for the next flush. Rows that have failed `max_attempts` times are dropped
//! with an error event and the `rows_dropped` counter.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::application::ports::{
    NewTopic, ScheduledTask, Scheduler, StoreError, TickRow, TickStore,
};
use crate::application::services::TopicCache;
use crate::domain::observation::{Observation, TopicId};
use crate::infrastructure::metrics;

// =============================================================================
// Configuration
// =============================================================================

/// Flush triggers and retry budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSettings {
    /// Buffered observations that trigger an immediate flush.
    pub batch_size: usize,
    /// Delay after the first buffered observation before a timed flush.
    pub batch_interval: Duration,
    /// Flush attempts per row before it is dropped.
    pub max_attempts: u32,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            batch_interval: Duration::from_secs(1),
            max_attempts: 3,
        }
    }
}

// =============================================================================
// Outcomes
// =============================================================================

/// Result of handing an observation to the writer.
#[derive(Debug)]
pub enum Enqueued {
    /// Buffered; `pending` observations are waiting.
    Buffered {
        /// Buffer length after the append.
        pending: usize,
    },
    /// The size threshold was reached and a flush was spawned.
    FlushTriggered(JoinHandle<FlushOutcome>),
}

/// Result of one flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was buffered.
    Empty,
    /// The transaction committed.
    Committed {
        /// Rows inserted.
        rows: u64,
    },
    /// The transaction was rolled back.
    Failed {
        /// Rows put back for the next flush.
        requeued: usize,
        /// Rows dropped after exhausting their attempts.
        dropped: usize,
        /// Failure description.
        error: String,
    },
}

/// Snapshot of writer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriterStats {
    /// Observations currently buffered.
    pub pending: usize,
    /// Observations accepted by `enqueue`.
    pub enqueued: u64,
    /// Committed flushes.
    pub flushes_committed: u64,
    /// Rolled back flushes.
    pub flushes_failed: u64,
    /// Rows committed.
    pub rows_written: u64,
    /// Rows put back after a failed flush.
    pub rows_requeued: u64,
    /// Rows lost after exhausting their attempts.
    pub rows_dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    flushes_committed: AtomicU64,
    flushes_failed: AtomicU64,
    rows_written: AtomicU64,
    rows_requeued: AtomicU64,
    rows_dropped: AtomicU64,
}

// =============================================================================
// Writer
// =============================================================================

#[derive(Debug)]
struct Pending {
    observation: Observation,
    attempts: u32,
}

#[derive(Debug, Default)]
struct BufferState {
    items: Vec<Pending>,
    timer: Option<ScheduledTask>,
}

impl BufferState {
    /// Disarm the timer and swap the buffer out.
    fn take(&mut self) -> Vec<Pending> {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
        std::mem::take(&mut self.items)
    }
}

/// Buffered transactional writer for observations.
pub struct BatchWriter {
    settings: BatchSettings,
    store: Arc<dyn TickStore>,
    topics: Arc<TopicCache>,
    scheduler: Arc<dyn Scheduler>,
    state: Mutex<BufferState>,
    /// Serializes transactions.
    persist_gate: tokio::sync::Mutex<()>,
    /// Batches swapped out and not yet settled.
    in_flight: AtomicUsize,
    settled: Notify,
    counters: Counters,
    this: Weak<Self>,
}

impl std::fmt::Debug for BatchWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchWriter")
            .field("settings", &self.settings)
            .field("pending", &self.state.lock().items.len())
            .finish_non_exhaustive()
    }
}

impl BatchWriter {
    /// Create a writer.
    ///
    /// A zero batch size is treated as one, and a zero attempt budget as a
    /// single attempt.
    #[must_use]
    pub fn new(
        settings: BatchSettings,
        store: Arc<dyn TickStore>,
        topics: Arc<TopicCache>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Arc<Self> {
        let settings = BatchSettings {
            batch_size: settings.batch_size.max(1),
            max_attempts: settings.max_attempts.max(1),
            ..settings
        };

        Arc::new_cyclic(|this| Self {
            settings,
            store,
            topics,
            scheduler,
            state: Mutex::new(BufferState::default()),
            persist_gate: tokio::sync::Mutex::new(()),
            in_flight: AtomicUsize::new(0),
            settled: Notify::new(),
            counters: Counters::default(),
            this: this.clone(),
        })
    }

    /// Effective settings.
    #[must_use]
    pub const fn settings(&self) -> &BatchSettings {
        &self.settings
    }

    /// Append an observation.
    ///
    /// Never waits on I/O. Arms the interval timer for the first buffered
    /// observation and spawns a flush once the size threshold is reached.
    /// Must be called within a Tokio runtime.
    pub fn enqueue(&self, observation: Observation) -> Enqueued {
        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        metrics::record_observation_enqueued();

        let mut state = self.state.lock();
        state.items.push(Pending {
            observation,
            attempts: 0,
        });

        if state.items.len() >= self.settings.batch_size {
            if let Some(writer) = self.this.upgrade() {
                let batch = state.take();
                let settle = self.take_flight();
                drop(state);
                tracing::debug!(rows = batch.len(), "Batch size reached, flushing");
                return Enqueued::FlushTriggered(tokio::spawn(async move {
                    writer.persist(batch, settle).await
                }));
            }
        }

        if state.timer.is_none() {
            state.timer = Some(self.arm_timer());
        }
        Enqueued::Buffered {
            pending: state.items.len(),
        }
    }

    /// Persist everything buffered now.
    ///
    /// No-op on an empty buffer. Otherwise disarms the timer, swaps the
    /// buffer out and writes it in one transaction.
    pub async fn flush(&self) -> FlushOutcome {
        let (batch, settle) = {
            let mut state = self.state.lock();
            let batch = state.take();
            if batch.is_empty() {
                return FlushOutcome::Empty;
            }
            (batch, self.take_flight())
        };
        self.persist(batch, settle).await
    }

    /// Flush until the buffer is empty and no batch is in flight.
    ///
    /// Used on shutdown. Waits for batches already swapped out by a size
    /// trigger or the timer, since their rows may be requeued. Terminates
    /// because every failed flush consumes one attempt of each row it carried.
    pub async fn drain(&self) -> WriterStats {
        loop {
            self.wait_settled().await;
            if self.flush().await == FlushOutcome::Empty && self.in_flight() == 0 {
                break;
            }
        }
        self.stats()
    }

    /// Batches swapped out of the buffer whose transaction has not settled.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Observations currently buffered.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Whether the interval timer is armed.
    #[must_use]
    pub fn timer_armed(&self) -> bool {
        self.state.lock().timer.is_some()
    }

    /// Snapshot of writer counters.
    #[must_use]
    pub fn stats(&self) -> WriterStats {
        WriterStats {
            pending: self.pending(),
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            flushes_committed: self.counters.flushes_committed.load(Ordering::Relaxed),
            flushes_failed: self.counters.flushes_failed.load(Ordering::Relaxed),
            rows_written: self.counters.rows_written.load(Ordering::Relaxed),
            rows_requeued: self.counters.rows_requeued.load(Ordering::Relaxed),
            rows_dropped: self.counters.rows_dropped.load(Ordering::Relaxed),
        }
    }

    fn arm_timer(&self) -> ScheduledTask {
        let this = self.this.clone();
        self.scheduler.schedule(
            self.settings.batch_interval,
            Box::pin(async move {
                if let Some(writer) = this.upgrade() {
                    let _ = writer.flush().await;
                }
            }),
        )
    }

    async fn wait_settled(&self) {
        loop {
            // Registered before the check so a settle in between is not missed
            let settled = self.settled.notified();
            if self.in_flight() == 0 {
                return;
            }
            settled.await;
        }
    }

    /// Count a batch just swapped out; called under the state lock.
    fn take_flight(&self) -> Settle {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        Settle(self.this.clone())
    }

    async fn persist(&self, batch: Vec<Pending>, _settle: Settle) -> FlushOutcome {
        let _gate = self.persist_gate.lock().await;
        let started = Instant::now();
        let rows = batch.len();

        let result = self.write_batch(&batch).await;
        metrics::record_flush_duration(started.elapsed());

        match result {
            Ok(written) => {
                self.counters.flushes_committed.fetch_add(1, Ordering::Relaxed);
                self.counters.rows_written.fetch_add(written, Ordering::Relaxed);
                metrics::record_flush(true);
                metrics::record_rows_written(written);
                tracing::info!(rows = written, "Batch committed");
                FlushOutcome::Committed { rows: written }
            }
            Err(e) => {
                self.counters.flushes_failed.fetch_add(1, Ordering::Relaxed);
                metrics::record_flush(false);
                tracing::error!(error = %e, rows, "Batch insert failed, rolled back");
                self.requeue_or_drop(batch, &e)
            }
        }
    }

    /// One transaction: resolve ids, multi-row insert, commit.
    async fn write_batch(&self, batch: &[Pending]) -> Result<u64, StoreError> {
        let mut tx = self.store.begin().await?;

        let inserted = match self.resolve_rows(batch).await {
            Ok(rows) => tx.insert_ticks(&rows).await,
            Err(e) => Err(e),
        };

        match inserted {
            Ok(written) => {
                tx.commit().await?;
                Ok(written)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(error = %rollback, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Resolve each distinct topic once and build rows in buffer order.
    async fn resolve_rows(&self, batch: &[Pending]) -> Result<Vec<TickRow>, StoreError> {
        let mut ids: HashMap<&str, TopicId> = HashMap::new();
        let mut rows = Vec::with_capacity(batch.len());

        for pending in batch {
            let obs = &pending.observation;
            let topic_id = match ids.get(obs.topic.as_str()) {
                Some(id) => *id,
                None => {
                    let id = self
                        .topics
                        .resolve_id(&NewTopic::from_observation(obs))
                        .await?;
                    ids.insert(obs.topic.as_str(), id);
                    id
                }
            };
            rows.push(TickRow {
                topic_id,
                price: obs.price,
            });
        }

        Ok(rows)
    }

    fn requeue_or_drop(&self, batch: Vec<Pending>, error: &StoreError) -> FlushOutcome {
        let max_attempts = self.settings.max_attempts;
        let (retry, exhausted): (Vec<_>, Vec<_>) = batch
            .into_iter()
            .map(|mut p| {
                p.attempts += 1;
                p
            })
            .partition(|p| p.attempts < max_attempts);

        let requeued = retry.len();
        let dropped = exhausted.len();

        if dropped > 0 {
            self.counters
                .rows_dropped
                .fetch_add(dropped as u64, Ordering::Relaxed);
            metrics::record_rows_dropped(dropped as u64);
            tracing::error!(
                rows = dropped,
                attempts = max_attempts,
                error = %error,
                "Dropping observations after exhausting flush attempts"
            );
        }

        if requeued > 0 {
            self.counters
                .rows_requeued
                .fetch_add(requeued as u64, Ordering::Relaxed);
            metrics::record_rows_requeued(requeued as u64);

            let mut state = self.state.lock();
            // Retried rows go ahead of anything buffered during the failed flush
            let newer = std::mem::replace(&mut state.items, retry);
            state.items.extend(newer);
            if state.timer.is_none() {
                state.timer = Some(self.arm_timer());
            }
            tracing::warn!(rows = requeued, "Observations requeued for next flush");
        }

        FlushOutcome::Failed {
            requeued,
            dropped,
            error: error.to_string(),
        }
    }
}

/// Marks one in-flight batch settled once its persist finishes, or when a
/// flush task is dropped before it ran.
struct Settle(Weak<BatchWriter>);

impl Drop for Settle {
    fn drop(&mut self) {
        if let Some(writer) = self.0.upgrade() {
            writer.in_flight.fetch_sub(1, Ordering::AcqRel);
            writer.settled.notify_waiters();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
