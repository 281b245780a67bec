//! Constraint-status write-back loop.
//!
//! Idempotent, cancellable, bounded-retry loop that patches per-constraint
//! status with violations, total count, and audit timestamp. At any instant
//! at most one write-back loop runs; a new audit tick cancels the previous
//! loop before starting a new one.
//!
//! Cancellation uses a paired stop/stopped channel: a [`tokio::sync::watch`]
//! carries the stop signal, and a [`tokio::sync::oneshot`] sender is dropped
//! when the task exits — on any exit path, not just cancellation — so
//! `join_with_timeout` always eventually unblocks (or times out and leaks,
//! an accepted liveness trade-off).

use std::collections::HashMap;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{oneshot, watch};
use tracing::{info, warn};

use crate::store::{ObjectStore, StoreError};
use crate::types::{AuditResult, ConstraintKey, ConstraintStatus, KindId, PersistedViolation};

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_FACTOR: f64 = 2.0;
const BACKOFF_JITTER: f64 = 1.0;
const BACKOFF_MAX_STEPS: u32 = 5;

/// Identifies one constraint the write-back loop must reconcile: its
/// aggregation key plus enough addressing information to fetch/update it
/// through an [`ObjectStore`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConstraintRef {
    pub key: ConstraintKey,
    pub kind: KindId,
    pub namespace: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum WriteBackError {
    #[error("write-back retries exhausted with {0} candidate(s) still pending")]
    RetriesExhausted(usize),
}

/// Compute the status patch for one constraint: truncate violations to
/// `limit`, set `auditTimestamp` and `totalViolations`. An empty violation
/// list removes `violations` entirely rather than writing an empty array.
pub fn compute_status_patch(
    violations: &[AuditResult],
    total: i64,
    tick_timestamp: &str,
    limit: usize,
) -> ConstraintStatus {
    let persisted: Vec<PersistedViolation> = violations.iter().take(limit).map(PersistedViolation::from).collect();

    ConstraintStatus {
        audit_timestamp: Some(tick_timestamp.to_string()),
        total_violations: Some(total),
        violations: if persisted.is_empty() { None } else { Some(persisted) },
    }
}

/// Run one pass over every still-pending candidate. Returns the set of
/// candidates that must be retried. A `true` second element means a stop
/// was observed and the caller should not retry further.
async fn run_pass<S: ObjectStore>(
    store: &S,
    pending: &mut HashMap<ConstraintKey, ConstraintRef>,
    violations: &HashMap<ConstraintKey, Vec<AuditResult>>,
    totals: &HashMap<ConstraintKey, i64>,
    tick_timestamp: &str,
    limit: usize,
    stop_rx: &mut watch::Receiver<bool>,
) -> bool {
    let keys: Vec<ConstraintKey> = pending.keys().cloned().collect();

    for key in keys {
        if *stop_rx.borrow() {
            return true;
        }

        let Some(candidate) = pending.get(&key) else { continue };
        let empty = Vec::new();
        let result_list = violations.get(&key).unwrap_or(&empty);
        let total = *totals.get(&key).unwrap_or(&0);
        let status = compute_status_patch(result_list, total, tick_timestamp, limit);

        match apply_one(store, candidate, status).await {
            Ok(()) => {
                pending.remove(&key);
            }
            Err(StoreError::NotFound) => {
                info!(constraint = %key, "writeback_not_found_dropping_candidate");
                pending.remove(&key);
            }
            Err(e) => {
                warn!(constraint = %key, error = %e, "writeback_update_failed_will_retry");
            }
        }
    }

    false
}

async fn apply_one<S: ObjectStore>(
    store: &S,
    candidate: &ConstraintRef,
    status: ConstraintStatus,
) -> Result<(), StoreError> {
    // Fetch latest to confirm existence; a "not found" here is
    // terminal-success for this candidate.
    store.get(&candidate.kind, candidate.namespace.as_deref(), &candidate.key.name).await?;

    let status_json = serde_json::to_value(&status).expect("ConstraintStatus always serializes");
    store
        .update_status(&candidate.kind, candidate.namespace.as_deref(), &candidate.key.name, status_json)
        .await
}

struct Backoff {
    duration: Duration,
    steps_taken: u32,
}

impl Backoff {
    fn new() -> Self {
        Backoff { duration: BACKOFF_BASE, steps_taken: 0 }
    }

    fn exhausted(&self) -> bool {
        self.steps_taken >= BACKOFF_MAX_STEPS
    }

    fn next_wait(&mut self) -> Duration {
        self.steps_taken += 1;
        let jitter_secs = rand::thread_rng().gen_range(0.0..=BACKOFF_JITTER) * self.duration.as_secs_f64();
        let wait = self.duration + Duration::from_secs_f64(jitter_secs);
        self.duration = self.duration.mul_f64(BACKOFF_FACTOR);
        wait
    }
}

/// Drive the write-back loop to completion: run passes, sleeping between
/// them per the exponential backoff policy, until `pending` is empty
/// (success) or the stop signal fires (early, non-error exit) or retries
/// exhaust (error).
pub async fn drive<S: ObjectStore>(
    store: &S,
    mut pending: HashMap<ConstraintKey, ConstraintRef>,
    violations: HashMap<ConstraintKey, Vec<AuditResult>>,
    totals: HashMap<ConstraintKey, i64>,
    tick_timestamp: String,
    limit: usize,
    mut stop_rx: watch::Receiver<bool>,
) -> Result<(), WriteBackError> {
    let mut backoff = Backoff::new();

    loop {
        let stopped = run_pass(store, &mut pending, &violations, &totals, &tick_timestamp, limit, &mut stop_rx).await;

        if stopped {
            return Ok(());
        }
        if pending.is_empty() {
            return Ok(());
        }
        if backoff.exhausted() {
            warn!(pending = pending.len(), "writeback_retries_exhausted");
            return Err(WriteBackError::RetriesExhausted(pending.len()));
        }

        tokio::time::sleep(backoff.next_wait()).await;
    }
}

/// A running write-back worker plus the handle the next audit tick uses to
/// cancel it and (bounded-)wait for it to stop.
pub struct WriteBackHandle {
    stop_tx: watch::Sender<bool>,
    stopped_rx: oneshot::Receiver<()>,
    join: tokio::task::JoinHandle<Result<(), WriteBackError>>,
}

impl WriteBackHandle {
    /// Request cancellation. Non-blocking; does not wait for the worker to
    /// actually stop (see [`Self::join_with_timeout`]).
    pub fn cancel(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Wait for the worker to stop, up to `timeout`. Exceeding the timeout
    /// leaks the worker rather than blocking forever — an
    /// accepted trade-off for liveness.
    pub async fn join_with_timeout(self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.stopped_rx).await;
        // Intentionally do not abort `self.join`: if the timeout elapsed the
        // worker is left running and will finish (or keep retrying) on its
        // own; dropping the JoinHandle here detaches it rather than
        // cancelling it.
        drop(self.join);
    }

    /// Await the worker's own result directly (used by callers that don't
    /// need to race a timeout, e.g. tests).
    pub async fn join(self) -> Result<(), WriteBackError> {
        self.join.await.expect("write-back task panicked")
    }
}

/// Spawn a write-back pass as a background task, returning a handle the
/// caller uses to cancel and/or join it.
pub fn spawn<S>(
    store: std::sync::Arc<S>,
    pending: HashMap<ConstraintKey, ConstraintRef>,
    violations: HashMap<ConstraintKey, Vec<AuditResult>>,
    totals: HashMap<ConstraintKey, i64>,
    tick_timestamp: String,
    limit: usize,
) -> WriteBackHandle
where
    S: ObjectStore + Send + Sync + 'static,
{
    let (stop_tx, stop_rx) = watch::channel(false);
    let (stopped_tx, stopped_rx) = oneshot::channel();

    let join = tokio::task::spawn(async move {
        let result = drive(store.as_ref(), pending, violations, totals, tick_timestamp, limit, stop_rx).await;
        let _ = stopped_tx.send(());
        result
    });

    WriteBackHandle { stop_tx, stopped_rx, join }
}
