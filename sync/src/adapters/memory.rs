use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::Mutex;
use tracing::info;

use crate::adapters::base::{AdapterExit, DestinationAdapter, SourceAdapter};
use crate::error::{ErrorKind, SyncResult};
use crate::sync_error;
use crate::types::Message;

/// Buffer size for live in-memory sources; large enough that tests never
/// stall on the pipe itself instead of the bounded channel.
const LIVE_PIPE_CAPACITY: usize = 64 * 1024;

#[derive(Debug)]
struct SourceInner {
    /// Protocol bytes emitted at start for scripted sources.
    script: Vec<u8>,
    /// Pre-created reader side for live sources.
    live: Option<DuplexStream>,
    started: bool,
    exit: AdapterExit,
}

/// In-memory source adapter for testing and development purposes.
///
/// A scripted source emits a fixed sequence of protocol lines and then
/// reaches EOF. A live source is backed by an in-memory pipe whose writer is
/// handed to the caller, which makes mid-stream scenarios (cancellation,
/// slow emission) straightforward to drive.
#[derive(Debug, Clone)]
pub struct MemorySource {
    inner: Arc<Mutex<SourceInner>>,
}

impl MemorySource {
    /// Creates a source that emits the given messages, one per line, then EOF.
    pub fn scripted(messages: &[Message]) -> Self {
        let mut script = Vec::new();
        for message in messages {
            // Serializing a message we just built cannot fail.
            let line = serde_json::to_vec(message).expect("message serialization failed");
            script.extend_from_slice(&line);
            script.push(b'\n');
        }

        Self::from_bytes(script)
    }

    /// Creates a source that emits the given raw lines verbatim, then EOF.
    ///
    /// Useful for exercising the parser's handling of non-protocol noise.
    pub fn raw_lines(lines: &[&str]) -> Self {
        let mut script = Vec::new();
        for line in lines {
            script.extend_from_slice(line.as_bytes());
            script.push(b'\n');
        }

        Self::from_bytes(script)
    }

    /// Creates a live source together with the writer feeding it.
    ///
    /// The stream stays open until the writer is dropped; dropping it is the
    /// clean EOF.
    pub fn streaming() -> (Self, DuplexStream) {
        let (writer, reader) = tokio::io::duplex(LIVE_PIPE_CAPACITY);

        let source = Self {
            inner: Arc::new(Mutex::new(SourceInner {
                script: Vec::new(),
                live: Some(reader),
                started: false,
                exit: AdapterExit::clean(),
            })),
        };

        (source, writer)
    }

    /// Overrides the exit status this source reports from `stop`.
    pub async fn set_exit(&self, exit: AdapterExit) {
        self.inner.lock().await.exit = exit;
    }

    fn from_bytes(script: Vec<u8>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SourceInner {
                script,
                live: None,
                started: false,
                exit: AdapterExit::clean(),
            })),
        }
    }
}

impl SourceAdapter for MemorySource {
    type Output = DuplexStream;

    async fn start(&self) -> SyncResult<DuplexStream> {
        let mut inner = self.inner.lock().await;

        if inner.started {
            return Err(sync_error!(
                ErrorKind::InvalidState,
                "Memory source was already started"
            ));
        }
        inner.started = true;

        if let Some(reader) = inner.live.take() {
            return Ok(reader);
        }

        let (mut writer, reader) = tokio::io::duplex(inner.script.len().max(1));
        writer
            .write_all(&inner.script)
            .await
            .map_err(|err| {
                sync_error!(
                    ErrorKind::SourceStartFailed,
                    "Failed to stage scripted source output",
                    detail = err.to_string(),
                    source: err
                )
            })?;
        // Dropping the writer is the scripted source's EOF.
        drop(writer);

        Ok(reader)
    }

    async fn stop(&self, _grace: Duration) -> SyncResult<AdapterExit> {
        let inner = self.inner.lock().await;

        info!("memory source stopped");

        Ok(inner.exit)
    }
}

#[derive(Debug)]
struct DestinationInner {
    writes: Vec<Message>,
    started: bool,
    flush_calls: u64,
    exit: AdapterExit,
}

/// In-memory destination adapter for testing and development purposes.
///
/// Records every accepted message in order, which lets tests assert both
/// delivery completeness and ordering. An optional per-write delay turns it
/// into the throttled consumer the backpressure scenarios need.
#[derive(Debug, Clone)]
pub struct MemoryDestination {
    inner: Arc<Mutex<DestinationInner>>,
    write_delay: Option<Duration>,
}

impl MemoryDestination {
    /// Creates a destination that accepts writes immediately.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(DestinationInner {
                writes: Vec::new(),
                started: false,
                flush_calls: 0,
                exit: AdapterExit::clean(),
            })),
            write_delay: None,
        }
    }

    /// Makes every write take at least `delay` before being accepted.
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    /// Returns a copy of all accepted messages, in acceptance order.
    pub async fn writes(&self) -> Vec<Message> {
        self.inner.lock().await.writes.clone()
    }

    /// Returns the payloads of accepted RECORD messages, in order.
    pub async fn record_payloads(&self) -> Vec<serde_json::Value> {
        let inner = self.inner.lock().await;
        inner
            .writes
            .iter()
            .filter_map(|message| match message {
                Message::Record(record) => Some(record.payload.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of times `flush` was invoked.
    pub async fn flush_calls(&self) -> u64 {
        self.inner.lock().await.flush_calls
    }

    /// Overrides the exit status this destination reports from `stop`.
    pub async fn set_exit(&self, exit: AdapterExit) {
        self.inner.lock().await.exit = exit;
    }
}

impl Default for MemoryDestination {
    fn default() -> Self {
        Self::new()
    }
}

impl DestinationAdapter for MemoryDestination {
    async fn start(&self) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;
        inner.started = true;

        Ok(())
    }

    async fn write(&self, message: &Message) -> SyncResult<()> {
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.inner.lock().await;
        inner.writes.push(message.clone());

        Ok(())
    }

    async fn flush(&self) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;
        inner.flush_calls += 1;

        info!(accepted = inner.writes.len(), "memory destination flushed");

        Ok(())
    }

    async fn stop(&self, _grace: Duration) -> SyncResult<AdapterExit> {
        let inner = self.inner.lock().await;

        info!("memory destination stopped");

        Ok(inner.exit)
    }
}
