//! Per-key work queue and reconcile workers.
//!
//! The queue holds spec references, never specs. Its guarantees:
//!
//! - a key is queued at most once, however often it is added
//! - a key is handed to at most one worker at a time; adding a key that is
//!   being processed marks it dirty and it is queued again once the worker
//!   calls [`WorkQueue::done`]
//! - delayed adds keep only the earliest pending deadline per key
//! - failing keys back off exponentially up to a cap, and a success resets
//!   the counter; a failed create is the exception, since the controller has
//!   already scheduled its fixed retry
//!
//! [`WorkQueue`] is the [`Scheduler`] handed to the controller.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use esg_core::controller::{Controller, ReconcileOutcome, Scheduler};
use esg_core::error::ReconcileError;
use esg_core::spec::ObjectRef;

/// First backoff step after a failed pass.
const BASE_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Default)]
struct QueueState {
    ready: VecDeque<ObjectRef>,
    queued: HashSet<ObjectRef>,
    processing: HashSet<ObjectRef>,
    dirty: HashSet<ObjectRef>,
    delayed: HashMap<ObjectRef, Instant>,
    failures: HashMap<ObjectRef, u32>,
    shut_down: bool,
}

struct Inner {
    state: Mutex<QueueState>,
    notify: Notify,
    max_backoff: Duration,
    shutdown: watch::Receiver<bool>,
}

/// Deduplicating, delay-capable queue of spec references.
#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkQueue")
            .field("max_backoff", &self.inner.max_backoff)
            .finish_non_exhaustive()
    }
}

impl WorkQueue {
    /// Create an empty queue. Delayed adds are dropped once `shutdown` flips.
    #[must_use]
    pub fn new(max_backoff: Duration, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
                max_backoff,
                shutdown,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        // The state is plain collections, consistent after every statement.
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `key` now.
    pub fn add(&self, key: &ObjectRef) {
        let mut state = self.state();
        if state.shut_down || state.queued.contains(key) {
            return;
        }
        if state.processing.contains(key) {
            state.dirty.insert(key.clone());
            return;
        }
        state.queued.insert(key.clone());
        state.ready.push_back(key.clone());
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Queue `key` once `delay` has elapsed.
    ///
    /// If an earlier deadline is already pending for `key` this is a no-op;
    /// a later pending deadline is superseded.
    pub fn add_after(&self, key: &ObjectRef, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let deadline = Instant::now() + delay;
        {
            let mut state = self.state();
            if state.shut_down {
                return;
            }
            if state.delayed.get(key).is_some_and(|pending| *pending <= deadline) {
                return;
            }
            state.delayed.insert(key.clone(), deadline);
        }

        let queue = self.clone();
        let key = key.clone();
        let mut shutdown = self.inner.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep_until(deadline) => queue.fire(&key, deadline),
                _ = shutdown.wait_for(|stop| *stop) => {}
            }
        });
    }

    fn fire(&self, key: &ObjectRef, deadline: Instant) {
        let current = {
            let mut state = self.state();
            if state.delayed.get(key) == Some(&deadline) {
                state.delayed.remove(key);
                true
            } else {
                false
            }
        };
        if current {
            self.add(key);
        }
    }

    /// Queue `key` after its next backoff step.
    pub fn add_with_backoff(&self, key: &ObjectRef) -> Duration {
        let delay = {
            let mut state = self.state();
            let attempt = state.failures.entry(key.clone()).or_insert(0);
            let delay = backoff(*attempt, self.inner.max_backoff);
            *attempt = attempt.saturating_add(1);
            delay
        };
        self.add_after(key, delay);
        delay
    }

    /// Reset the backoff of `key`.
    pub fn forget(&self, key: &ObjectRef) {
        self.state().failures.remove(key);
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    ///
    /// The caller must call [`WorkQueue::done`] when finished with the key.
    pub async fn next(&self) -> Option<ObjectRef> {
        loop {
            let notified = self.inner.notify.notified();
            {
                let mut state = self.state();
                if state.shut_down {
                    return None;
                }
                if let Some(key) = state.ready.pop_front() {
                    state.queued.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }
            notified.await;
        }
    }

    /// Mark `key` as no longer being processed, re-queueing it if it was
    /// added in the meantime.
    pub fn done(&self, key: &ObjectRef) {
        let requeue = {
            let mut state = self.state();
            state.processing.remove(key);
            state.dirty.remove(key)
        };
        if requeue {
            self.add(key);
        }
    }

    /// Stop handing out keys and drop every pending one.
    pub fn shut_down(&self) {
        {
            let mut state = self.state();
            state.shut_down = true;
            state.ready.clear();
            state.queued.clear();
            state.delayed.clear();
        }
        self.inner.notify.notify_waiters();
    }

    /// Number of keys ready to be handed out.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state().ready.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Scheduler for WorkQueue {
    fn schedule_retry(&self, key: &ObjectRef, after: Duration) {
        debug!(spec = %key, after_secs = after.as_secs(), "pass scheduled");
        self.add_after(key, after);
    }
}

/// Backoff for the given zero-based attempt: 1s, 2s, 4s, … capped at `max`.
fn backoff(attempt: u32, max: Duration) -> Duration {
    let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
    BASE_BACKOFF.saturating_mul(factor).min(max)
}

/// Pull keys off `queue` and reconcile them until shutdown.
pub async fn run_worker(
    id: usize,
    queue: WorkQueue,
    controller: Arc<Controller>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(worker = id, "reconcile worker started");
    loop {
        let key = tokio::select! {
            key = queue.next() => match key {
                Some(key) => key,
                None => break,
            },
            _ = shutdown.wait_for(|stop| *stop) => break,
        };

        match controller.reconcile(&key, &shutdown).await {
            Ok(outcome) => {
                queue.forget(&key);
                if outcome == ReconcileOutcome::Cancelled {
                    queue.done(&key);
                    break;
                }
                debug!(worker = id, spec = %key, ?outcome, "pass finished");
            }
            Err(e @ ReconcileError::CreateFailed { .. }) => {
                let retry = controller.config().retry_interval;
                warn!(worker = id, spec = %key, error = %e, retry_secs = retry.as_secs(), "pass failed");
            }
            Err(e) => {
                let delay = queue.add_with_backoff(&key);
                if delay >= queue.inner.max_backoff {
                    error!(worker = id, spec = %key, error = %e, retry_secs = delay.as_secs(), "pass failed");
                } else {
                    warn!(worker = id, spec = %key, error = %e, retry_secs = delay.as_secs(), "pass failed");
                }
            }
        }
        queue.done(&key);
    }
    info!(worker = id, "reconcile worker stopped");
}
