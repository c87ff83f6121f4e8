use std::future::Future;
use std::time::Duration;

use tokio::io::AsyncRead;

use crate::error::SyncResult;
use crate::types::Message;

/// Exit status reported by an adapter after it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterExit {
    /// Process exit code when one is available. [`None`] when the adapter was
    /// force-killed (terminated by signal) before reporting a code.
    pub code: Option<i32>,
}

impl AdapterExit {
    /// A clean, zero exit.
    pub fn clean() -> Self {
        Self { code: Some(0) }
    }

    /// An exit without a code, as after a forced kill.
    pub fn killed() -> Self {
        Self { code: None }
    }

    /// Returns true for a voluntary zero exit.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Trait for collaborators producing the protocol stream of a running source
/// connector.
///
/// The pipeline only consumes the adapter's output stream and issues
/// [`SourceAdapter::stop`] on completion or cancellation; everything else
/// about the connector (its configuration, credentials, wire format beyond
/// the message envelope) is the adapter's concern.
///
/// Implementations are cheaply cloneable handles (interior state behind an
/// [`std::sync::Arc`]); the orchestrator keeps one clone to stop the adapter
/// while the producer lane owns the output stream.
pub trait SourceAdapter {
    /// The byte stream carrying line-delimited protocol messages.
    type Output: AsyncRead + Send + Unpin + 'static;

    /// Starts the source and hands over its protocol output stream.
    ///
    /// Must be called at most once; a second call is an invalid state.
    fn start(&self) -> impl Future<Output = SyncResult<Self::Output>> + Send;

    /// Stops the source, giving it `grace` to exit voluntarily before a
    /// forced termination, and reports how it exited.
    fn stop(&self, grace: Duration) -> impl Future<Output = SyncResult<AdapterExit>> + Send;
}

/// Trait for collaborators accepting protocol messages on behalf of a running
/// destination connector.
///
/// The write entry point is invoked by the single consumer lane only, one
/// message at a time, preserving the destination's own ordering contract.
/// Batching, if any, happens behind this interface at the adapter's
/// discretion.
pub trait DestinationAdapter {
    /// Starts the destination.
    fn start(&self) -> impl Future<Output = SyncResult<()>> + Send;

    /// Hands one message to the destination.
    ///
    /// Returning `Ok` means the destination accepted the message; combined
    /// with FIFO channel ordering this is what makes preceding state
    /// confirmable.
    fn write(&self, message: &Message) -> impl Future<Output = SyncResult<()>> + Send;

    /// Guarantees all previously accepted messages are durable before
    /// returning.
    fn flush(&self) -> impl Future<Output = SyncResult<()>> + Send;

    /// Stops the destination, giving it `grace` to exit voluntarily before a
    /// forced termination, and reports how it exited.
    fn stop(&self, grace: Duration) -> impl Future<Output = SyncResult<AdapterExit>> + Send;
}
