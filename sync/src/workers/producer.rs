use futures::StreamExt;
use tokio::io::{AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::{Instrument, info};

use crate::concurrency::channel::BoundedChannel;
use crate::concurrency::shutdown::ShutdownRx;
use crate::error::{ErrorKind, SyncResult};
use crate::protocol::MessageStream;
use crate::state::checkpoint::CheckpointTracker;
use crate::state::stats::StatsTracker;
use crate::sync_error;
use crate::types::{Message, PipelineId};
use crate::workers::base::{Worker, WorkerHandle};

/// How the producer lane ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerOutcome {
    /// The source output stream reached a clean EOF and every decoded message
    /// was enqueued.
    Eof,
    /// The cancellation signal stopped the lane at an iteration boundary.
    Cancelled,
    /// The channel was closed from the consumer side, which happens on the
    /// consumer's fault path. Orderly from this lane's perspective; the
    /// orchestrator holds the authoritative fault.
    ChannelClosed,
}

/// Handle for monitoring the producer worker.
#[derive(Debug)]
pub struct ProducerWorkerHandle {
    handle: Option<JoinHandle<SyncResult<ProducerOutcome>>>,
}

impl WorkerHandle for ProducerWorkerHandle {
    type Output = ProducerOutcome;

    async fn wait(mut self) -> SyncResult<ProducerOutcome> {
        let Some(handle) = self.handle.take() else {
            return Ok(ProducerOutcome::Eof);
        };

        handle.await.map_err(|err| {
            sync_error!(
                ErrorKind::ProducerPanic,
                "Producer worker panicked",
                detail = err.to_string(),
                source: err
            )
        })?
    }
}

/// Worker driving the producer lane of an attempt.
///
/// [`ProducerWorker`] decodes the source adapter's output stream and moves
/// every message into the bounded channel, notifying the checkpoint tracker
/// of STATE messages as they are observed. The channel is the lane's only
/// outlet: when the consumer falls behind, this lane suspends inside
/// [`BoundedChannel::put`], which in turn suspends the upstream read loop —
/// the backpressure path of the whole pipeline.
///
/// On every exit path the worker closes the channel so the consumer can
/// drain and terminate.
#[derive(Debug)]
pub struct ProducerWorker<R> {
    pipeline_id: PipelineId,
    output: R,
    channel: BoundedChannel<Message>,
    tracker: CheckpointTracker,
    stats: StatsTracker,
    shutdown_rx: ShutdownRx,
}

impl<R> ProducerWorker<R>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    /// Creates the producer lane over a source adapter's output stream.
    pub fn new(
        pipeline_id: PipelineId,
        output: R,
        channel: BoundedChannel<Message>,
        tracker: CheckpointTracker,
        stats: StatsTracker,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        Self {
            pipeline_id,
            output,
            channel,
            tracker,
            stats,
            shutdown_rx,
        }
    }
}

impl<R> Worker<ProducerWorkerHandle> for ProducerWorker<R>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    async fn start(self) -> SyncResult<ProducerWorkerHandle> {
        info!("starting producer worker");

        let span = tracing::info_span!("producer_worker", pipeline_id = self.pipeline_id);
        let worker = async move {
            let outcome = run_producer(
                self.output,
                self.channel,
                self.tracker,
                self.stats,
                self.shutdown_rx,
            )
            .await?;

            info!(?outcome, "producer worker completed");

            Ok(outcome)
        }
        .instrument(span.or_current());

        let handle = tokio::spawn(worker);

        Ok(ProducerWorkerHandle {
            handle: Some(handle),
        })
    }
}

async fn run_producer<R>(
    output: R,
    channel: BoundedChannel<Message>,
    tracker: CheckpointTracker,
    stats: StatsTracker,
    mut shutdown_rx: ShutdownRx,
) -> SyncResult<ProducerOutcome>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut stream = Box::pin(MessageStream::new(BufReader::new(output)));

    loop {
        // Cancellation is checked at every iteration boundary, including
        // while suspended waiting for the next message.
        let next = tokio::select! {
            biased;

            _ = shutdown_rx.signaled() => {
                info!("shutdown signal received, producer stops reading");
                channel.close();

                return Ok(ProducerOutcome::Cancelled);
            }
            next = stream.next() => next,
        };

        let message = match next {
            Some(Ok(message)) => message,
            Some(Err(err)) => {
                channel.close();

                return Err(err);
            }
            None => {
                info!("source output stream reached end of stream");
                channel.close();

                return Ok(ProducerOutcome::Eof);
            }
        };

        match &message {
            Message::Record(_) => stats.record_read(),
            Message::State(_) => {
                tracker.observe(&message);
                stats.state_observed();
            }
            _ => {}
        }

        // `put` suspends while the channel is at capacity; a cancellation
        // arriving then must still stop the lane, discarding the in-flight
        // message (it was never enqueued, so it is not yet owed to anyone).
        tokio::select! {
            biased;

            _ = shutdown_rx.signaled() => {
                info!("shutdown signal received while enqueueing, producer stops");
                channel.close();

                return Ok(ProducerOutcome::Cancelled);
            }
            result = channel.put(message) => {
                if let Err(err) = result {
                    if err.kind() == ErrorKind::ChannelClosed {
                        info!("channel closed under the producer, stopping");

                        return Ok(ProducerOutcome::ChannelClosed);
                    }

                    channel.close();

                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::shutdown::create_shutdown_channel;
    use serde_json::json;

    fn script(messages: &[Message]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for message in messages {
            bytes.extend_from_slice(&serde_json::to_vec(message).unwrap());
            bytes.push(b'\n');
        }
        bytes
    }

    #[tokio::test]
    async fn producer_enqueues_all_messages_then_closes() {
        let messages = vec![
            Message::record("users", json!({"id": 1})),
            Message::state(Some("users"), json!({"cursor": 1})),
            Message::record("users", json!({"id": 2})),
        ];
        let input = script(&messages);

        let channel = BoundedChannel::new(8);
        let tracker = CheckpointTracker::new();
        let stats = StatsTracker::new();
        let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

        let worker = ProducerWorker::new(
            1,
            std::io::Cursor::new(input),
            channel.clone(),
            tracker.clone(),
            stats.clone(),
            shutdown_rx,
        );
        let handle = worker.start().await.unwrap();

        assert_eq!(handle.wait().await.unwrap(), ProducerOutcome::Eof);

        let mut delivered = Vec::new();
        while let Some(message) = channel.take().await {
            delivered.push(message);
        }
        assert_eq!(delivered, messages);

        // STATE was observed but nothing is confirmed yet.
        assert!(tracker.snapshot().is_empty());
        assert_eq!(
            tracker.observed().get(Some("users")),
            Some(&json!({"cursor": 1}))
        );

        let stats = stats.snapshot();
        assert_eq!(stats.records_read, 2);
        assert_eq!(stats.states_observed, 1);
    }

    #[tokio::test]
    async fn cancellation_stops_a_producer_stuck_in_put() {
        let messages = vec![
            Message::record("users", json!({"id": 1})),
            Message::record("users", json!({"id": 2})),
            Message::record("users", json!({"id": 3})),
        ];
        let input = script(&messages);

        // Capacity one and no consumer: the producer must suspend in put.
        let channel = BoundedChannel::new(1);
        let (shutdown_tx, shutdown_rx) = create_shutdown_channel();

        let worker = ProducerWorker::new(
            1,
            std::io::Cursor::new(input),
            channel.clone(),
            CheckpointTracker::new(),
            StatsTracker::new(),
            shutdown_rx,
        );
        let handle = worker.start().await.unwrap();

        tokio::task::yield_now().await;
        shutdown_tx.shutdown().unwrap();

        assert_eq!(handle.wait().await.unwrap(), ProducerOutcome::Cancelled);
        assert!(channel.is_closed());
    }

    #[tokio::test]
    async fn consumer_side_close_stops_the_producer_cleanly() {
        let messages = vec![
            Message::record("users", json!({"id": 1})),
            Message::record("users", json!({"id": 2})),
        ];
        let input = script(&messages);

        let channel = BoundedChannel::new(1);
        let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

        let worker = ProducerWorker::new(
            1,
            std::io::Cursor::new(input),
            channel.clone(),
            CheckpointTracker::new(),
            StatsTracker::new(),
            shutdown_rx,
        );
        let handle = worker.start().await.unwrap();

        tokio::task::yield_now().await;
        channel.close();

        assert_eq!(
            handle.wait().await.unwrap(),
            ProducerOutcome::ChannelClosed
        );
    }
}
