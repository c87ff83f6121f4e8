use std::future::Future;

use crate::error::SyncResult;
use crate::types::{AttemptId, Checkpoint, ConnectionId};

/// Trait for durably storing and retrieving sync checkpoints.
///
/// [`StateStore`] is the engine's only persistence boundary: the orchestrator
/// writes the final confirmed checkpoint through it at finalize time (for
/// successful, failed, and cancelled attempts alike), and callers read the
/// latest checkpoint for a connection before starting a new attempt to
/// support resumption.
///
/// Implementations should ensure thread-safety and handle concurrent access.
pub trait StateStore {
    /// Durably records `checkpoint` as the outcome of `attempt_id`, and as
    /// the latest checkpoint of `connection_id`.
    ///
    /// Persisting the same checkpoint twice for the same attempt must be
    /// idempotent with respect to the data a later load observes.
    fn persist_checkpoint(
        &self,
        connection_id: ConnectionId,
        attempt_id: AttemptId,
        checkpoint: Checkpoint,
    ) -> impl Future<Output = SyncResult<()>> + Send;

    /// Returns the most recently persisted checkpoint for `connection_id`,
    /// or [`None`] when no attempt has ever confirmed state for it.
    fn load_checkpoint(
        &self,
        connection_id: ConnectionId,
    ) -> impl Future<Output = SyncResult<Option<Checkpoint>>> + Send;
}
