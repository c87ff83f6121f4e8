use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::error::SyncResult;
use crate::store::state::base::StateStore;
use crate::types::{AttemptId, Checkpoint, ConnectionId};

#[derive(Debug, Default)]
struct Inner {
    by_attempt: HashMap<AttemptId, Checkpoint>,
    latest: HashMap<ConnectionId, Checkpoint>,
    persist_calls: u64,
}

/// In-memory checkpoint store for testing and development purposes.
///
/// All data is held in memory and lost when the process terminates. The
/// accessor methods make the stored checkpoints inspectable, which tests use
/// to verify persistence behavior.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStateStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the checkpoint persisted for a specific attempt, if any.
    pub async fn checkpoint_for_attempt(&self, attempt_id: AttemptId) -> Option<Checkpoint> {
        let inner = self.inner.lock().await;
        inner.by_attempt.get(&attempt_id).cloned()
    }

    /// Number of times `persist_checkpoint` was invoked.
    pub async fn persist_calls(&self) -> u64 {
        let inner = self.inner.lock().await;
        inner.persist_calls
    }
}

impl StateStore for MemoryStateStore {
    async fn persist_checkpoint(
        &self,
        connection_id: ConnectionId,
        attempt_id: AttemptId,
        checkpoint: Checkpoint,
    ) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;

        info!(%connection_id, %attempt_id, "persisting checkpoint");

        inner.persist_calls += 1;
        inner.by_attempt.insert(attempt_id, checkpoint.clone());
        inner.latest.insert(connection_id, checkpoint);

        Ok(())
    }

    async fn load_checkpoint(
        &self,
        connection_id: ConnectionId,
    ) -> SyncResult<Option<Checkpoint>> {
        let inner = self.inner.lock().await;
        Ok(inner.latest.get(&connection_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    #[tokio::test]
    async fn load_returns_latest_persisted_checkpoint() {
        let store = MemoryStateStore::new();
        let connection_id = Uuid::new_v4();

        let mut first = Checkpoint::default();
        first.set(None, json!({"cursor": 1}));
        let mut second = Checkpoint::default();
        second.set(None, json!({"cursor": 2}));

        store
            .persist_checkpoint(connection_id, Uuid::new_v4(), first)
            .await
            .unwrap();
        store
            .persist_checkpoint(connection_id, Uuid::new_v4(), second.clone())
            .await
            .unwrap();

        let loaded = store.load_checkpoint(connection_id).await.unwrap();
        assert_eq!(loaded, Some(second));
    }

    #[tokio::test]
    async fn unknown_connection_loads_nothing() {
        let store = MemoryStateStore::new();
        let loaded = store.load_checkpoint(Uuid::new_v4()).await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn checkpoints_are_tracked_per_attempt() {
        let store = MemoryStateStore::new();
        let attempt_id = Uuid::new_v4();

        let mut checkpoint = Checkpoint::default();
        checkpoint.set(Some("users"), json!({"cursor": 7}));

        store
            .persist_checkpoint(Uuid::new_v4(), attempt_id, checkpoint.clone())
            .await
            .unwrap();

        assert_eq!(
            store.checkpoint_for_attempt(attempt_id).await,
            Some(checkpoint)
        );
        assert_eq!(store.persist_calls().await, 1);
    }
}
