use std::future::Future;

use crate::error::SyncResult;

/// Trait for the background workers driving one pipeline lane.
///
/// Starting a worker spawns its processing task and returns immediately with
/// a handle for monitoring. The generic parameter `H` is the handle type.
pub trait Worker<H>
where
    H: WorkerHandle,
{
    /// Starts the worker and returns a handle for monitoring its execution.
    fn start(self) -> impl Future<Output = SyncResult<H>> + Send;
}

/// Handle for waiting on a running worker.
///
/// The handle outlives the worker's processing loop; waiting on it yields the
/// lane's final outcome, with task panics mapped to dedicated error kinds.
pub trait WorkerHandle {
    /// The lane's final outcome on orderly completion.
    type Output;

    /// Waits for the worker to complete and returns its outcome.
    ///
    /// The handle is consumed by this operation.
    fn wait(self) -> impl Future<Output = SyncResult<Self::Output>> + Send;
}
