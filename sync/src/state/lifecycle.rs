use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::bail;
use crate::concurrency::shutdown::{ShutdownRx, ShutdownTx, create_shutdown_channel};
use crate::error::{ErrorKind, SyncResult};
use crate::state::stats::SyncStats;
use crate::types::{AttemptId, Checkpoint, JobId};

/// Status of one execution try of a sync job.
///
/// The only legal transitions are `PENDING → RUNNING` and from either of
/// those into one of the three terminal states. Terminal states are
/// absorbing: once reached, no further transition is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AttemptStatus {
    /// Created, adapters not yet started.
    Pending,
    /// Both adapters started, pipeline lanes running.
    Running,
    /// Source reached EOF and every message was delivered and flushed.
    Succeeded,
    /// A fatal fault stopped the pipeline; the failure reason is recorded.
    Failed,
    /// An external cancel request (or attempt timeout) stopped the pipeline.
    Cancelled,
}

impl AttemptStatus {
    /// Returns true for the absorbing states.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AttemptStatus::Succeeded | AttemptStatus::Failed | AttemptStatus::Cancelled
        )
    }

    /// Returns whether the transition `self → next` is legal.
    pub fn can_transition_to(&self, next: AttemptStatus) -> bool {
        matches!(
            (self, next),
            (AttemptStatus::Pending, AttemptStatus::Running)
                | (AttemptStatus::Pending, AttemptStatus::Cancelled)
                | (AttemptStatus::Running, AttemptStatus::Succeeded)
                | (AttemptStatus::Running, AttemptStatus::Failed)
                | (AttemptStatus::Running, AttemptStatus::Cancelled)
        )
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttemptStatus::Pending => "PENDING",
            AttemptStatus::Running => "RUNNING",
            AttemptStatus::Succeeded => "SUCCEEDED",
            AttemptStatus::Failed => "FAILED",
            AttemptStatus::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}

/// One execution try of a sync job.
///
/// An attempt is created when the orchestrator begins a run and finalized
/// exactly once, on reaching a terminal status.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub id: AttemptId,
    pub job_id: JobId,
    pub status: AttemptStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// The confirmed checkpoint at finalize time; retained for FAILED and
    /// CANCELLED attempts so a subsequent attempt can resume from it.
    pub final_checkpoint: Option<Checkpoint>,
    /// Recorded fault, present only for FAILED attempts.
    pub failure_reason: Option<String>,
    pub stats: SyncStats,
}

#[derive(Debug)]
struct AttemptEntry {
    attempt: Attempt,
    cancel_tx: ShutdownTx,
}

/// Process-wide registry of attempts: the lifecycle query/control surface.
///
/// The registry enforces the transition table and owns the per-attempt
/// cancellation signal. External callers (an API layer) use
/// [`AttemptRegistry::get_status`], [`AttemptRegistry::cancel`], and
/// [`AttemptRegistry::get_final_checkpoint`]; the orchestrator reports
/// transitions into it.
#[derive(Debug, Clone, Default)]
pub struct AttemptRegistry {
    inner: Arc<Mutex<HashMap<AttemptId, AttemptEntry>>>,
}

impl AttemptRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new PENDING attempt for `job_id` and returns its identifier.
    pub fn create_attempt(&self, job_id: JobId) -> AttemptId {
        let id = Uuid::new_v4();
        let (cancel_tx, _) = create_shutdown_channel();

        let attempt = Attempt {
            id,
            job_id,
            status: AttemptStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            final_checkpoint: None,
            failure_reason: None,
            stats: SyncStats::default(),
        };

        let mut inner = self.inner.lock().unwrap();
        inner.insert(id, AttemptEntry { attempt, cancel_tx });

        info!(attempt_id = %id, job_id = %job_id, "attempt created");

        id
    }

    /// Transitions the attempt to RUNNING, recording the start timestamp.
    ///
    /// Fails with [`ErrorKind::InvalidTransition`] when the attempt is not
    /// PENDING (for example because it was cancelled before starting).
    pub fn mark_running(&self, id: AttemptId) -> SyncResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let entry = entry_mut(&mut inner, id)?;

        let current = entry.attempt.status;
        if !current.can_transition_to(AttemptStatus::Running) {
            bail!(
                ErrorKind::InvalidTransition,
                "Attempt cannot transition to RUNNING",
                format!("attempt {id} is {current}")
            );
        }

        entry.attempt.status = AttemptStatus::Running;
        entry.attempt.started_at = Some(Utc::now());

        info!(attempt_id = %id, "attempt running");

        Ok(())
    }

    /// Finalizes the attempt into a terminal status, exactly once.
    ///
    /// Records the final checkpoint, the failure reason (for FAILED), and the
    /// attempt's counters. Fails with [`ErrorKind::InvalidTransition`] when
    /// the target is not terminal or the attempt already reached a terminal
    /// status.
    pub fn finalize(
        &self,
        id: AttemptId,
        status: AttemptStatus,
        final_checkpoint: Option<Checkpoint>,
        failure_reason: Option<String>,
        stats: SyncStats,
    ) -> SyncResult<()> {
        if !status.is_terminal() {
            bail!(
                ErrorKind::InvalidState,
                "Attempts can only be finalized into a terminal status",
                format!("{status} is not terminal")
            );
        }

        let mut inner = self.inner.lock().unwrap();
        let entry = entry_mut(&mut inner, id)?;

        let current = entry.attempt.status;
        if !current.can_transition_to(status) {
            bail!(
                ErrorKind::InvalidTransition,
                "Attempt cannot be finalized",
                format!("attempt {id} is {current}, refusing transition to {status}")
            );
        }

        entry.attempt.status = status;
        entry.attempt.finished_at = Some(Utc::now());
        entry.attempt.final_checkpoint = final_checkpoint;
        entry.attempt.failure_reason = failure_reason;
        entry.attempt.stats = stats;

        info!(attempt_id = %id, %status, "attempt finalized");

        Ok(())
    }

    /// Requests cancellation of the attempt.
    ///
    /// A PENDING attempt transitions directly to CANCELLED and its adapters
    /// are never started. For a RUNNING attempt the cancellation signal is
    /// broadcast and the orchestrator finalizes to CANCELLED after draining.
    /// Once the attempt is terminal this is an idempotent no-op; the return
    /// value tells whether a cancellation was actually initiated.
    pub fn cancel(&self, id: AttemptId) -> SyncResult<bool> {
        let mut inner = self.inner.lock().unwrap();
        let entry = entry_mut(&mut inner, id)?;

        match entry.attempt.status {
            AttemptStatus::Pending => {
                entry.attempt.status = AttemptStatus::Cancelled;
                entry.attempt.finished_at = Some(Utc::now());

                // Raised anyway in case a pipeline is concurrently starting
                // this attempt; its workers then stop immediately.
                let _ = entry.cancel_tx.shutdown();

                info!(attempt_id = %id, "pending attempt cancelled before start");

                Ok(true)
            }
            AttemptStatus::Running => {
                if entry.cancel_tx.shutdown().is_err() {
                    warn!(attempt_id = %id, "no pipeline is listening for cancellation");
                }

                info!(attempt_id = %id, "cancellation requested");

                Ok(true)
            }
            status => {
                info!(attempt_id = %id, %status, "cancel ignored, attempt already terminal");

                Ok(false)
            }
        }
    }

    /// Returns the current status of the attempt.
    pub fn get_status(&self, id: AttemptId) -> SyncResult<AttemptStatus> {
        let inner = self.inner.lock().unwrap();
        Ok(entry_ref(&inner, id)?.attempt.status)
    }

    /// Returns a copy of the attempt.
    pub fn get_attempt(&self, id: AttemptId) -> SyncResult<Attempt> {
        let inner = self.inner.lock().unwrap();
        Ok(entry_ref(&inner, id)?.attempt.clone())
    }

    /// Returns the final checkpoint of the attempt, absent while the attempt
    /// is still in flight or when it never confirmed any state.
    pub fn get_final_checkpoint(&self, id: AttemptId) -> SyncResult<Option<Checkpoint>> {
        let inner = self.inner.lock().unwrap();
        Ok(entry_ref(&inner, id)?.attempt.final_checkpoint.clone())
    }

    /// Returns a receiver for the attempt's cancellation signal.
    pub fn subscribe_cancel(&self, id: AttemptId) -> SyncResult<ShutdownRx> {
        let inner = self.inner.lock().unwrap();
        Ok(entry_ref(&inner, id)?.cancel_tx.subscribe())
    }
}

fn entry_ref(
    inner: &HashMap<AttemptId, AttemptEntry>,
    id: AttemptId,
) -> SyncResult<&AttemptEntry> {
    inner.get(&id).ok_or_else(|| {
        crate::sync_error!(
            ErrorKind::AttemptNotFound,
            "Attempt is not registered",
            format!("attempt {id} is unknown to this registry")
        )
    })
}

fn entry_mut(
    inner: &mut HashMap<AttemptId, AttemptEntry>,
    id: AttemptId,
) -> SyncResult<&mut AttemptEntry> {
    inner.get_mut(&id).ok_or_else(|| {
        crate::sync_error!(
            ErrorKind::AttemptNotFound,
            "Attempt is not registered",
            format!("attempt {id} is unknown to this registry")
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_attempt() -> (AttemptRegistry, AttemptId) {
        let registry = AttemptRegistry::new();
        let id = registry.create_attempt(Uuid::new_v4());
        (registry, id)
    }

    #[test]
    fn attempts_start_pending() {
        let (registry, id) = registry_with_attempt();
        assert_eq!(registry.get_status(id).unwrap(), AttemptStatus::Pending);
    }

    #[test]
    fn pending_to_running_to_succeeded() {
        let (registry, id) = registry_with_attempt();

        registry.mark_running(id).unwrap();
        assert_eq!(registry.get_status(id).unwrap(), AttemptStatus::Running);

        registry
            .finalize(id, AttemptStatus::Succeeded, None, None, SyncStats::default())
            .unwrap();
        assert_eq!(registry.get_status(id).unwrap(), AttemptStatus::Succeeded);
    }

    #[test]
    fn cancelling_a_pending_attempt_is_terminal() {
        let (registry, id) = registry_with_attempt();

        assert!(registry.cancel(id).unwrap());
        assert_eq!(registry.get_status(id).unwrap(), AttemptStatus::Cancelled);

        // Starting afterwards is an invalid transition.
        let err = registry.mark_running(id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    }

    #[test]
    fn terminal_states_absorb_further_cancels() {
        let (registry, id) = registry_with_attempt();

        registry.mark_running(id).unwrap();
        registry
            .finalize(id, AttemptStatus::Failed, None, Some("boom".into()), SyncStats::default())
            .unwrap();

        assert!(!registry.cancel(id).unwrap());
        assert!(!registry.cancel(id).unwrap());
        assert_eq!(registry.get_status(id).unwrap(), AttemptStatus::Failed);
    }

    #[test]
    fn finalize_is_exactly_once() {
        let (registry, id) = registry_with_attempt();
        registry.mark_running(id).unwrap();

        registry
            .finalize(id, AttemptStatus::Cancelled, None, None, SyncStats::default())
            .unwrap();

        let err = registry
            .finalize(id, AttemptStatus::Succeeded, None, None, SyncStats::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    }

    #[test]
    fn finalize_rejects_non_terminal_targets() {
        let (registry, id) = registry_with_attempt();

        let err = registry
            .finalize(id, AttemptStatus::Running, None, None, SyncStats::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn unknown_attempts_are_reported() {
        let registry = AttemptRegistry::new();
        let err = registry.get_status(Uuid::new_v4()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AttemptNotFound);
    }

    #[tokio::test]
    async fn cancel_signals_subscribers() {
        let (registry, id) = registry_with_attempt();
        registry.mark_running(id).unwrap();

        let mut cancel_rx = registry.subscribe_cancel(id).unwrap();
        assert!(!cancel_rx.is_signaled());

        registry.cancel(id).unwrap();
        cancel_rx.signaled().await;
    }

    #[test]
    fn transition_table_rejects_skips() {
        assert!(!AttemptStatus::Pending.can_transition_to(AttemptStatus::Succeeded));
        assert!(!AttemptStatus::Pending.can_transition_to(AttemptStatus::Failed));
        assert!(!AttemptStatus::Succeeded.can_transition_to(AttemptStatus::Cancelled));
        assert!(!AttemptStatus::Cancelled.can_transition_to(AttemptStatus::Running));
        assert!(!AttemptStatus::Failed.can_transition_to(AttemptStatus::Running));
    }
}
