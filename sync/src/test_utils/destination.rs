use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Notify, RwLock};

use crate::adapters::base::{AdapterExit, DestinationAdapter};
use crate::error::{ErrorKind, SyncResult};
use crate::sync_error;
use crate::test_utils::notify::TimedNotify;
use crate::types::Message;

type WriteCondition = Box<dyn Fn(&[Message]) -> bool + Send + Sync>;

struct Inner<D> {
    wrapped: D,
    writes: Vec<Message>,
    write_calls: u64,
    flush_calls: u64,
    conditions: Vec<(WriteCondition, Arc<Notify>)>,
}

impl<D> Inner<D> {
    fn check_conditions(&mut self) {
        let writes = self.writes.clone();
        self.conditions.retain(|(condition, notify)| {
            let met = condition(&writes);
            if met {
                notify.notify_one();
            }
            !met
        });
    }
}

/// Test wrapper for [`DestinationAdapter`] implementations.
///
/// [`FaultInjectingDestination`] records every message flowing into the
/// wrapped destination, supports waiting for write-count conditions, and can
/// fail the Nth write call to drive the pipeline's fault paths
/// deterministically.
#[derive(Clone)]
pub struct FaultInjectingDestination<D> {
    inner: Arc<RwLock<Inner<D>>>,
    /// 1-based index of the write call that fails; 0 disables injection.
    fail_write_at: Arc<AtomicU64>,
}

impl<D> FaultInjectingDestination<D> {
    /// Wraps a destination, recording all operations performed on it.
    pub fn wrap(destination: D) -> Self {
        let inner = Inner {
            wrapped: destination,
            writes: Vec::new(),
            write_calls: 0,
            flush_calls: 0,
            conditions: Vec::new(),
        };

        Self {
            inner: Arc::new(RwLock::new(inner)),
            fail_write_at: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Makes the `n`-th write call (1-based) fail with a destination I/O
    /// fault instead of reaching the wrapped destination.
    pub fn fail_write_at(self, n: u64) -> Self {
        self.fail_write_at.store(n, Ordering::SeqCst);
        self
    }

    /// Returns all messages the wrapped destination accepted, in order.
    pub async fn writes(&self) -> Vec<Message> {
        self.inner.read().await.writes.clone()
    }

    /// Number of times `flush` was invoked.
    pub async fn flush_calls(&self) -> u64 {
        self.inner.read().await.flush_calls
    }

    /// Registers a notification firing once the accepted writes match
    /// `condition`.
    pub async fn notify_on_writes<F>(&self, condition: F) -> TimedNotify
    where
        F: Fn(&[Message]) -> bool + Send + Sync + 'static,
    {
        let notify = Arc::new(Notify::new());
        let mut inner = self.inner.write().await;
        inner.conditions.push((Box::new(condition), notify.clone()));

        // The condition may already hold.
        inner.check_conditions();

        TimedNotify::new(notify)
    }

    /// Registers a notification firing once `count` writes were accepted.
    pub async fn wait_for_write_count(&self, count: usize) -> TimedNotify {
        self.notify_on_writes(move |writes| writes.len() >= count)
            .await
    }
}

impl<D> DestinationAdapter for FaultInjectingDestination<D>
where
    D: DestinationAdapter + Clone + Send + Sync,
{
    async fn start(&self) -> SyncResult<()> {
        let destination = self.inner.read().await.wrapped.clone();
        destination.start().await
    }

    async fn write(&self, message: &Message) -> SyncResult<()> {
        let destination = {
            let mut inner = self.inner.write().await;
            inner.write_calls += 1;

            let fail_at = self.fail_write_at.load(Ordering::SeqCst);
            if fail_at != 0 && inner.write_calls == fail_at {
                return Err(sync_error!(
                    ErrorKind::DestinationIoFailed,
                    "Injected destination write fault",
                    format!("write call {fail_at} failed by test configuration")
                ));
            }

            inner.wrapped.clone()
        };

        let result = destination.write(message).await;

        if result.is_ok() {
            let mut inner = self.inner.write().await;
            inner.writes.push(message.clone());
            inner.check_conditions();
        }

        result
    }

    async fn flush(&self) -> SyncResult<()> {
        let destination = {
            let mut inner = self.inner.write().await;
            inner.flush_calls += 1;
            inner.wrapped.clone()
        };

        destination.flush().await
    }

    async fn stop(&self, grace: Duration) -> SyncResult<AdapterExit> {
        let destination = self.inner.read().await.wrapped.clone();
        destination.stop(grace).await
    }
}
