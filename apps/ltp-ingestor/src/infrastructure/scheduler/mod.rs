//! Scheduler Adapters
//!
//! - [`TokioScheduler`]: spawns a task that sleeps, then runs the action
//! - [`ManualScheduler`]: holds actions until the caller fires them

use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{DeferredAction, ScheduledTask, Scheduler};

// =============================================================================
// Tokio Scheduler
// =============================================================================

/// Runs deferred actions on the Tokio runtime.
///
/// Must be used within a Tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

impl TokioScheduler {
    /// Create a new scheduler.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, action: DeferredAction) -> ScheduledTask {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    if !token.is_cancelled() {
                        action.await;
                    }
                }
            }
        });

        ScheduledTask::new(cancel)
    }
}

// =============================================================================
// Manual Scheduler
// =============================================================================

struct Entry {
    delay: Duration,
    task: ScheduledTask,
    action: DeferredAction,
}

/// Scheduler driven by the caller, for deterministic tests.
#[derive(Default)]
pub struct ManualScheduler {
    entries: Mutex<Vec<Entry>>,
}

impl std::fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("armed", &self.armed())
            .finish()
    }
}

impl ManualScheduler {
    /// Create an empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of scheduled actions not yet cancelled.
    #[must_use]
    pub fn armed(&self) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|e| !e.task.is_cancelled())
            .count()
    }

    /// Delays of the scheduled actions not yet cancelled, in schedule order.
    #[must_use]
    pub fn pending_delays(&self) -> Vec<Duration> {
        self.entries
            .lock()
            .iter()
            .filter(|e| !e.task.is_cancelled())
            .map(|e| e.delay)
            .collect()
    }

    /// Run every action scheduled so far that was not cancelled.
    ///
    /// Actions scheduled while firing are kept for the next call. Returns the
    /// number of actions run.
    pub async fn fire_all(&self) -> usize {
        let entries = std::mem::take(&mut *self.entries.lock());
        let mut fired = 0;
        for entry in entries {
            if entry.task.is_cancelled() {
                continue;
            }
            entry.action.await;
            fired += 1;
        }
        fired
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, action: DeferredAction) -> ScheduledTask {
        let task = ScheduledTask::default();
        self.entries.lock().push(Entry {
            delay,
            task: task.clone(),
            action,
        });
        task
    }
}

// =============================================================================
// Tests
// =============================================================================
