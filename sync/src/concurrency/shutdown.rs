//! Broadcast shutdown signaling for pipeline workers.
//!
//! A single shutdown signal must terminate both pipeline lanes at their next
//! iteration boundary. This module wraps a watch channel so that the signal
//! is level-triggered: receivers that subscribe (or check) after the signal
//! was raised still observe it.

use tokio::sync::watch;

/// Transmitter side of the shutdown channel.
///
/// Held by the attempt registry (one per attempt) and by the pipeline; firing
/// it is idempotent.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<bool>);

/// Receiver side of the shutdown channel.
///
/// Cloneable; each pipeline lane holds its own receiver and polls it at every
/// iteration boundary.
#[derive(Debug, Clone)]
pub struct ShutdownRx(watch::Receiver<bool>);

impl ShutdownTx {
    /// Raises the shutdown signal for all current and future receivers.
    ///
    /// Returns an error only when every receiver has already been dropped,
    /// which means there is nothing left to shut down.
    pub fn shutdown(&self) -> Result<(), watch::error::SendError<bool>> {
        self.0.send(true)
    }

    /// Creates a new receiver observing this shutdown channel.
    pub fn subscribe(&self) -> ShutdownRx {
        ShutdownRx(self.0.subscribe())
    }
}

impl ShutdownRx {
    /// Returns true once shutdown has been signaled.
    pub fn is_signaled(&self) -> bool {
        *self.0.borrow()
    }

    /// Waits until shutdown is signaled.
    ///
    /// Level-triggered: resolves immediately when the signal was raised
    /// before this call. If the transmitter is dropped without ever
    /// signaling, no shutdown can arrive anymore and this future stays
    /// pending forever; callers always race it against productive work in a
    /// `select!`.
    pub async fn signaled(&mut self) {
        if self.0.wait_for(|signaled| *signaled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Creates a connected shutdown channel pair.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTx(tx), ShutdownRx(rx))
}
