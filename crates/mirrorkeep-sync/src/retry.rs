//! Retry queue for operations that failed recoverably
//!
//! Watchers enqueue a [`PendingOperation`] whenever a filesystem call fails
//! with a lock or permission error. The queue re-attempts every pending
//! operation once per period, in enqueue order, until each succeeds or is
//! removed because its rule was deactivated.
//!
//! ## Timer model
//!
//! ```text
//!            enqueue (deadline = now + period)
//!   Idle ───────────────────────────────────────→ Armed
//!    ↑                                              │ deadline reached
//!    │  tick: nothing left          tick: ops left  ▼
//!    └──────────────────────────────── tick ───→ Armed (re-armed)
//! ```
//!
//! Every `enqueue` pushes the deadline a full period into the future. There
//! is no backoff and no attempt cap. The state machine is plain data guarded
//! by one mutex, so `enqueue`, `dequeue` and `tick` never interleave.
//! [`RetryQueue::run`] is the async driver that sleeps until the deadline.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use mirrorkeep_core::ports::notifier::{Category, Notifier, Severity};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::watcher::WatchKey;
use crate::Result;

// ============================================================================
// PendingOperation
// ============================================================================

/// Identifier assigned to an operation when it is enqueued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(u64);

/// Re-runnable body of a pending operation
pub type RetryAction = Box<dyn FnMut() -> Result<()> + Send>;

/// An operation waiting to be re-attempted
pub struct PendingOperation {
    id: OperationId,
    owner: WatchKey,
    description: String,
    queued_at: DateTime<Utc>,
    action: RetryAction,
}

impl PendingOperation {
    /// Wraps `action` for the registration identified by `owner`
    pub fn new<F>(owner: WatchKey, description: impl Into<String>, action: F) -> Self
    where
        F: FnMut() -> Result<()> + Send + 'static,
    {
        Self {
            id: OperationId(0),
            owner,
            description: description.into(),
            queued_at: Utc::now(),
            action: Box::new(action),
        }
    }

    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn owner(&self) -> &WatchKey {
        &self.owner
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn queued_at(&self) -> DateTime<Utc> {
        self.queued_at
    }
}

impl std::fmt::Debug for PendingOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingOperation")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("description", &self.description)
            .field("queued_at", &self.queued_at)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// RetryQueue
// ============================================================================

/// Timer state of the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// Nothing pending; no tick scheduled
    Idle,
    /// A tick is due at `deadline`
    Armed { deadline: Instant },
}

/// Outcome of one pass over the queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub remaining: usize,
}

#[derive(Default)]
struct QueueState {
    ops: Vec<PendingOperation>,
    deadline: Option<Instant>,
    next_id: u64,
}

/// Holds recoverably-failed operations and re-attempts them periodically
pub struct RetryQueue {
    state: Mutex<QueueState>,
    /// Wakes the driver whenever the deadline moves
    wake: Notify,
    period: Duration,
    notifier: Arc<dyn Notifier>,
}

impl RetryQueue {
    pub fn new(period: Duration, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            wake: Notify::new(),
            period,
            notifier,
        }
    }

    /// Appends `operation` and restarts the timer a full period from now
    pub fn enqueue(&self, mut operation: PendingOperation) -> OperationId {
        let id = {
            let mut state = self.lock();
            state.next_id += 1;
            let id = OperationId(state.next_id);
            operation.id = id;
            debug!(id = id.0, description = %operation.description, "Operation queued");
            state.ops.push(operation);
            state.deadline = Some(Instant::now() + self.period);
            id
        };
        self.wake.notify_one();
        id
    }

    /// Removes the given operations; unknown ids are ignored
    ///
    /// Returns how many operations were removed.
    pub fn dequeue(&self, ids: &[OperationId]) -> usize {
        let removed = {
            let mut state = self.lock();
            let before = state.ops.len();
            state.ops.retain(|op| !ids.contains(&op.id));
            if state.ops.is_empty() {
                state.deadline = None;
            }
            before - state.ops.len()
        };
        if removed > 0 {
            debug!(removed, "Operations dequeued");
            self.wake.notify_one();
        }
        removed
    }

    /// Ids of the pending operations owned by `owner`, in enqueue order
    pub fn pending_for(&self, owner: &WatchKey) -> Vec<OperationId> {
        self.lock()
            .ops
            .iter()
            .filter(|op| &op.owner == owner)
            .map(|op| op.id)
            .collect()
    }

    /// Attempts every pending operation once, in enqueue order
    ///
    /// Successful operations are removed. Failed or panicking ones stay
    /// queued, and the timer is re-armed only if something remains.
    pub fn tick(&self) -> TickReport {
        let mut state = self.lock();
        state.deadline = None;

        let pending = std::mem::take(&mut state.ops);
        let mut report = TickReport {
            attempted: pending.len(),
            ..TickReport::default()
        };

        for mut op in pending {
            // A panicking action must not take the rest of the pass with it
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| (op.action)()));
            match outcome {
                Ok(Ok(())) => {
                    report.succeeded += 1;
                    self.notifier.notify(
                        &format!("{} operation has been completed", op.description),
                        Category::RetryOperation,
                        Severity::Info,
                    );
                }
                Ok(Err(err)) => {
                    self.notifier.notify(
                        &format!("{}: {err}", op.description),
                        Category::RetryOperation,
                        Severity::Error,
                    );
                    state.ops.push(op);
                }
                Err(_) => {
                    self.notifier.notify(
                        &format!("{}: operation panicked", op.description),
                        Category::RetryOperation,
                        Severity::Error,
                    );
                    state.ops.push(op);
                }
            }
        }

        report.remaining = state.ops.len();
        if report.remaining > 0 {
            state.deadline = Some(Instant::now() + self.period);
        }
        report
    }

    pub fn state(&self) -> RetryState {
        match self.lock().deadline {
            Some(deadline) => RetryState::Armed { deadline },
            None => RetryState::Idle,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drives the timer until `shutdown` is cancelled
    ///
    /// Ticks run on the blocking pool. A tick already in progress when
    /// shutdown is requested is allowed to finish.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(period_secs = self.period.as_secs(), "Retry queue starting");

        loop {
            let deadline = self.lock().deadline;
            let due = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,

                // Deadline moved; recompute
                _ = self.wake.notified() => continue,

                _ = due => {
                    if !self.is_due() {
                        continue;
                    }
                    let queue = Arc::clone(&self);
                    match tokio::task::spawn_blocking(move || queue.tick()).await {
                        Ok(report) => info!(
                            attempted = report.attempted,
                            succeeded = report.succeeded,
                            remaining = report.remaining,
                            "Retry pass finished"
                        ),
                        Err(err) => error!(error = %err, "Retry pass panicked"),
                    }
                }
            }
        }

        info!("Retry queue stopped");
    }

    fn is_due(&self) -> bool {
        matches!(self.lock().deadline, Some(at) if at <= Instant::now())
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ============================================================================
// Unit tests
// ============================================================================
