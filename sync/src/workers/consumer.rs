use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, trace, warn};

use crate::adapters::base::DestinationAdapter;
use crate::concurrency::channel::BoundedChannel;
use crate::concurrency::shutdown::ShutdownRx;
use crate::error::{ErrorKind, SyncResult};
use crate::state::checkpoint::CheckpointTracker;
use crate::state::stats::StatsTracker;
use crate::sync_error;
use crate::types::{LogLevel, LogMessage, Message, PipelineId};
use crate::workers::base::{Worker, WorkerHandle};

/// How the consumer lane ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerOutcome {
    /// The channel drained to end-of-stream and the destination was flushed.
    Drained,
    /// The cancellation signal stopped the lane at an iteration boundary;
    /// messages still buffered in the channel were discarded.
    Cancelled,
}

/// Handle for monitoring the consumer worker.
#[derive(Debug)]
pub struct ConsumerWorkerHandle {
    handle: Option<JoinHandle<SyncResult<ConsumerOutcome>>>,
}

impl WorkerHandle for ConsumerWorkerHandle {
    type Output = ConsumerOutcome;

    async fn wait(mut self) -> SyncResult<ConsumerOutcome> {
        let Some(handle) = self.handle.take() else {
            return Ok(ConsumerOutcome::Drained);
        };

        handle.await.map_err(|err| {
            sync_error!(
                ErrorKind::ConsumerPanic,
                "Consumer worker panicked",
                detail = err.to_string(),
                source: err
            )
        })?
    }
}

/// Worker driving the consumer lane of an attempt.
///
/// [`ConsumerWorker`] takes messages off the bounded channel in FIFO order
/// and forwards RECORD, STATE, and CONTROL messages to the destination
/// adapter's write entry point, which no other lane ever touches. After the
/// destination accepts a STATE write, the message is confirmed on the
/// checkpoint tracker; LOG and TRACE messages are re-emitted through tracing
/// and not forwarded.
///
/// On a destination fault the worker closes the channel so the producer
/// unblocks, and surfaces the fault to the orchestrator.
#[derive(Debug)]
pub struct ConsumerWorker<D> {
    pipeline_id: PipelineId,
    channel: BoundedChannel<Message>,
    destination: D,
    tracker: CheckpointTracker,
    stats: StatsTracker,
    shutdown_rx: ShutdownRx,
}

impl<D> ConsumerWorker<D>
where
    D: DestinationAdapter + Send + Sync + 'static,
{
    /// Creates the consumer lane writing into `destination`.
    pub fn new(
        pipeline_id: PipelineId,
        channel: BoundedChannel<Message>,
        destination: D,
        tracker: CheckpointTracker,
        stats: StatsTracker,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        Self {
            pipeline_id,
            channel,
            destination,
            tracker,
            stats,
            shutdown_rx,
        }
    }
}

impl<D> Worker<ConsumerWorkerHandle> for ConsumerWorker<D>
where
    D: DestinationAdapter + Send + Sync + 'static,
{
    async fn start(self) -> SyncResult<ConsumerWorkerHandle> {
        info!("starting consumer worker");

        let span = tracing::info_span!("consumer_worker", pipeline_id = self.pipeline_id);
        let worker = async move {
            let outcome = run_consumer(
                self.channel,
                self.destination,
                self.tracker,
                self.stats,
                self.shutdown_rx,
            )
            .await?;

            info!(?outcome, "consumer worker completed");

            Ok(outcome)
        }
        .instrument(span.or_current());

        let handle = tokio::spawn(worker);

        Ok(ConsumerWorkerHandle {
            handle: Some(handle),
        })
    }
}

async fn run_consumer<D>(
    channel: BoundedChannel<Message>,
    destination: D,
    tracker: CheckpointTracker,
    stats: StatsTracker,
    mut shutdown_rx: ShutdownRx,
) -> SyncResult<ConsumerOutcome>
where
    D: DestinationAdapter + Send + Sync + 'static,
{
    loop {
        // Cancellation is checked at every iteration boundary. On
        // cancellation the lane stops taking: whatever still sits in the
        // channel was never handed to the destination and is discarded, so
        // no checkpoint can run ahead of delivered data.
        let taken = tokio::select! {
            biased;

            _ = shutdown_rx.signaled() => {
                info!(
                    discarded = channel.len(),
                    "shutdown signal received, consumer stops taking"
                );
                channel.close();

                return Ok(ConsumerOutcome::Cancelled);
            }
            taken = channel.take() => taken,
        };

        let Some(message) = taken else {
            // End-of-stream: everything enqueued before the close has been
            // written; make it durable before reporting success.
            destination.flush().await?;

            return Ok(ConsumerOutcome::Drained);
        };

        match &message {
            Message::Log(log) => emit_connector_log(log),
            Message::Trace(trace_message) => {
                debug!(payload = %trace_message.payload, "connector trace");
            }
            _ => {
                if let Err(err) = destination.write(&message).await {
                    // Close so a producer suspended at capacity unblocks;
                    // it will see ChannelClosed and stop.
                    channel.close();

                    return Err(err);
                }

                match &message {
                    Message::Record(_) => stats.record_written(),
                    Message::State(_) => {
                        tracker.confirm(&message);
                        stats.state_confirmed();
                    }
                    _ => {}
                }
            }
        }
    }
}

/// Re-emits a connector LOG message through tracing at its declared severity.
fn emit_connector_log(log: &LogMessage) {
    let payload = &log.payload;
    match log.level.unwrap_or(LogLevel::Info) {
        LogLevel::Trace => trace!(%payload, "connector log"),
        LogLevel::Debug => debug!(%payload, "connector log"),
        LogLevel::Info => info!(%payload, "connector log"),
        LogLevel::Warn => warn!(%payload, "connector log"),
        LogLevel::Error => error!(%payload, "connector log"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryDestination;
    use crate::concurrency::shutdown::create_shutdown_channel;
    use crate::test_utils::destination::FaultInjectingDestination;
    use serde_json::json;

    async fn run_to_completion(
        channel: BoundedChannel<Message>,
        destination: impl DestinationAdapter + Send + Sync + 'static,
        tracker: CheckpointTracker,
    ) -> SyncResult<ConsumerOutcome> {
        let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();
        let worker = ConsumerWorker::new(
            1,
            channel,
            destination,
            tracker,
            StatsTracker::new(),
            shutdown_rx,
        );
        worker.start().await.unwrap().wait().await
    }

    #[tokio::test]
    async fn consumer_forwards_and_confirms_in_order() {
        let channel = BoundedChannel::new(8);
        let destination = MemoryDestination::new();
        let tracker = CheckpointTracker::new();

        channel
            .put(Message::record("users", json!({"id": 1})))
            .await
            .unwrap();
        channel
            .put(Message::state(Some("users"), json!({"cursor": 1})))
            .await
            .unwrap();
        channel
            .put(Message::log(LogLevel::Info, json!({"message": "noise"})))
            .await
            .unwrap();
        channel.close();

        let outcome =
            run_to_completion(channel, destination.clone(), tracker.clone()).await;
        assert_eq!(outcome.unwrap(), ConsumerOutcome::Drained);

        // LOG is not forwarded; RECORD and STATE are, in order.
        let writes = destination.writes().await;
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0], Message::record("users", json!({"id": 1})));
        assert_eq!(
            writes[1],
            Message::state(Some("users"), json!({"cursor": 1}))
        );

        // The STATE write was accepted, so it is confirmed now.
        assert_eq!(
            tracker.snapshot().get(Some("users")),
            Some(&json!({"cursor": 1}))
        );
        assert_eq!(destination.flush_calls().await, 1);
    }

    #[tokio::test]
    async fn destination_fault_surfaces_and_closes_the_channel() {
        let channel = BoundedChannel::new(8);
        let destination =
            FaultInjectingDestination::wrap(MemoryDestination::new()).fail_write_at(2);
        let tracker = CheckpointTracker::new();

        for i in 0..4 {
            channel
                .put(Message::record("users", json!({"id": i})))
                .await
                .unwrap();
        }

        let err = run_to_completion(channel.clone(), destination, tracker)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DestinationIoFailed);
        assert!(channel.is_closed());
    }

    #[tokio::test]
    async fn cancellation_discards_unconsumed_messages() {
        let channel = BoundedChannel::new(8);
        let destination = MemoryDestination::new();
        let tracker = CheckpointTracker::new();

        channel
            .put(Message::state(Some("users"), json!({"cursor": 9})))
            .await
            .unwrap();

        let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
        shutdown_tx.shutdown().unwrap();

        let worker = ConsumerWorker::new(
            1,
            channel,
            destination.clone(),
            tracker.clone(),
            StatsTracker::new(),
            shutdown_rx,
        );
        let outcome = worker.start().await.unwrap().wait().await.unwrap();

        assert_eq!(outcome, ConsumerOutcome::Cancelled);
        // The buffered STATE was never dequeued, so nothing was written or
        // confirmed.
        assert!(destination.writes().await.is_empty());
        assert!(tracker.snapshot().is_empty());
    }
}
