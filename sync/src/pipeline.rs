use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::adapters::base::{DestinationAdapter, SourceAdapter};
use crate::bail;
use crate::concurrency::channel::BoundedChannel;
use crate::config::PipelineConfig;
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::state::checkpoint::CheckpointTracker;
use crate::state::lifecycle::{Attempt, AttemptRegistry, AttemptStatus};
use crate::state::stats::StatsTracker;
use crate::store::state::StateStore;
use crate::sync_error;
use crate::types::{AttemptId, JobId, PipelineId};
use crate::workers::base::{Worker, WorkerHandle};
use crate::workers::consumer::{ConsumerOutcome, ConsumerWorker, ConsumerWorkerHandle};
use crate::workers::producer::{ProducerOutcome, ProducerWorker, ProducerWorkerHandle};

#[derive(Debug)]
enum PipelineState {
    NotStarted,
    Started {
        producer: ProducerWorkerHandle,
        consumer: ConsumerWorkerHandle,
    },
}

/// Orchestrator of one sync attempt.
///
/// [`SyncPipeline`] owns the end-to-end run: it starts the source and
/// destination adapters, wires parser → bounded channel → destination writer,
/// drives the attempt state machine in the registry, and enforces
/// cancellation and the optional attempt timeout.
///
/// The two lanes it spawns share nothing but the bounded channel and the
/// checkpoint tracker. Whatever way the attempt ends, the orchestrator
/// persists the last confirmed checkpoint before surfacing the outcome, so a
/// subsequent attempt can resume from it.
#[derive(Debug)]
pub struct SyncPipeline<Src, Dst, S> {
    config: Arc<PipelineConfig>,
    attempt_id: AttemptId,
    registry: AttemptRegistry,
    source: Src,
    destination: Dst,
    store: S,
    tracker: CheckpointTracker,
    stats: StatsTracker,
    state: PipelineState,
}

impl<Src, Dst, S> SyncPipeline<Src, Dst, S>
where
    Src: SourceAdapter + Clone + Send + Sync + 'static,
    Dst: DestinationAdapter + Clone + Send + Sync + 'static,
    S: StateStore + Clone + Send + Sync + 'static,
{
    /// Creates a pipeline and registers a PENDING attempt for `job_id`.
    ///
    /// The attempt is queryable and cancellable through the registry from
    /// this point on, even before [`SyncPipeline::start`] runs.
    pub fn new(
        config: PipelineConfig,
        job_id: JobId,
        registry: AttemptRegistry,
        source: Src,
        destination: Dst,
        store: S,
    ) -> SyncResult<Self> {
        config.validate().map_err(|err| {
            sync_error!(
                ErrorKind::ConfigError,
                "Invalid pipeline configuration",
                detail = err.to_string(),
                source: err
            )
        })?;

        let attempt_id = registry.create_attempt(job_id);

        Ok(Self {
            config: Arc::new(config),
            attempt_id,
            registry,
            source,
            destination,
            store,
            tracker: CheckpointTracker::new(),
            stats: StatsTracker::new(),
            state: PipelineState::NotStarted,
        })
    }

    pub fn id(&self) -> PipelineId {
        self.config.id
    }

    pub fn attempt_id(&self) -> AttemptId {
        self.attempt_id
    }

    /// Starts the adapters and spawns the two pipeline lanes.
    ///
    /// The attempt transitions to RUNNING exactly once both adapters have
    /// started. If the attempt was cancelled while still PENDING, the
    /// adapters are never started and this returns without error.
    pub async fn start(&mut self) -> SyncResult<()> {
        if matches!(self.state, PipelineState::Started { .. }) {
            bail!(
                ErrorKind::InvalidState,
                "Pipeline was already started"
            );
        }

        info!(
            pipeline_id = self.config.id,
            attempt_id = %self.attempt_id,
            "starting sync pipeline"
        );

        // A cancel that arrived while the attempt was PENDING wins: it is
        // already terminal and the adapters must never start.
        if self.registry.get_status(self.attempt_id)? == AttemptStatus::Cancelled {
            info!("attempt was cancelled while pending, adapters will not be started");

            return Ok(());
        }

        let shutdown_rx = self.registry.subscribe_cancel(self.attempt_id)?;
        let grace = Duration::from_millis(self.config.grace_period_ms);

        let source_output = self.source.start().await?;

        if let Err(err) = self.destination.start().await {
            // The source is already running; reap it before reporting.
            if let Err(stop_err) = self.source.stop(grace).await {
                warn!("failed to stop the source after a destination start failure: {stop_err}");
            }

            return Err(err);
        }

        if let Err(err) = self.registry.mark_running(self.attempt_id) {
            // Lost the race against a cancel that landed during adapter
            // startup: tear the adapters down and report a clean cancel.
            if self.registry.get_status(self.attempt_id)? == AttemptStatus::Cancelled {
                info!("attempt was cancelled during adapter startup, stopping adapters");

                if let Err(stop_err) = self.source.stop(grace).await {
                    warn!("failed to stop the source after cancellation: {stop_err}");
                }
                if let Err(stop_err) = self.destination.stop(grace).await {
                    warn!("failed to stop the destination after cancellation: {stop_err}");
                }

                return Ok(());
            }

            return Err(err);
        }

        let channel = BoundedChannel::new(self.config.channel.capacity);

        let producer = ProducerWorker::new(
            self.config.id,
            source_output,
            channel.clone(),
            self.tracker.clone(),
            self.stats.clone(),
            shutdown_rx.clone(),
        )
        .start()
        .await?;

        let consumer = ConsumerWorker::new(
            self.config.id,
            channel,
            self.destination.clone(),
            self.tracker.clone(),
            self.stats.clone(),
            shutdown_rx,
        )
        .start()
        .await?;

        self.state = PipelineState::Started { producer, consumer };

        Ok(())
    }

    /// Supervises the attempt to completion and finalizes it.
    ///
    /// Returns the finalized attempt for SUCCEEDED and CANCELLED outcomes.
    /// For a FAILED outcome the fault is returned as the error after the
    /// attempt was finalized (and its partial checkpoint persisted) in the
    /// registry.
    pub async fn wait(self) -> SyncResult<Attempt> {
        let PipelineState::Started { producer, consumer } = self.state else {
            info!("pipeline was not started, nothing to wait for");

            return self.registry.get_attempt(self.attempt_id);
        };

        // The attempt timeout follows the same path as an explicit cancel:
        // a watchdog fires the registry's cancellation signal on expiry.
        let watchdog = self.config.max_attempt_duration_ms.map(|limit| {
            let registry = self.registry.clone();
            let attempt_id = self.attempt_id;

            tokio::spawn(async move {
                sleep(Duration::from_millis(limit)).await;

                match registry.cancel(attempt_id) {
                    Ok(true) => {
                        warn!(%attempt_id, "attempt exceeded its maximum duration, cancelling")
                    }
                    Ok(false) => {}
                    Err(err) => error!("attempt timeout watchdog failed to cancel: {err}"),
                }
            })
        });

        // The producer finishing (for any reason) closes the channel, which
        // lets the consumer drain and finish; a consumer fault also closes
        // it, which unblocks a producer suspended at capacity. Waiting
        // sequentially therefore cannot deadlock.
        let producer_result = producer.wait().await;
        let consumer_result = consumer.wait().await;

        if let Some(watchdog) = watchdog {
            watchdog.abort();
        }

        let mut cancelled = false;
        let mut errors: Vec<SyncError> = Vec::new();

        match producer_result {
            Ok(ProducerOutcome::Cancelled) => cancelled = true,
            Ok(ProducerOutcome::Eof | ProducerOutcome::ChannelClosed) => {}
            Err(err) => errors.push(err),
        }
        match consumer_result {
            Ok(ConsumerOutcome::Cancelled) => cancelled = true,
            Ok(ConsumerOutcome::Drained) => {}
            Err(err) => errors.push(err),
        }

        // Both adapters are stopped on every path; their exit statuses only
        // matter on the success path, where a non-zero exit is a fault.
        let grace = Duration::from_millis(self.config.grace_period_ms);
        let source_exit = self.source.stop(grace).await;
        let destination_exit = self.destination.stop(grace).await;

        if errors.is_empty() && !cancelled {
            match source_exit {
                Ok(exit) if !exit.success() => errors.push(sync_error!(
                    ErrorKind::SourceExitFailed,
                    "Source connector exited with a failure status",
                    format!("exit code {:?}", exit.code)
                )),
                Ok(_) => {}
                Err(err) => errors.push(err),
            }
            match destination_exit {
                Ok(exit) if !exit.success() => errors.push(sync_error!(
                    ErrorKind::DestinationExitFailed,
                    "Destination connector exited with a failure status",
                    format!("exit code {:?}", exit.code)
                )),
                Ok(_) => {}
                Err(err) => errors.push(err),
            }
        } else {
            // The pipeline just tore the connectors down; abnormal exits are
            // expected and only logged.
            if let Err(err) = source_exit {
                warn!("failed to stop the source adapter: {err}");
            }
            if let Err(err) = destination_exit {
                warn!("failed to stop the destination adapter: {err}");
            }
        }

        // Persist the last confirmed checkpoint before surfacing anything.
        // An empty checkpoint is not persisted: it would clobber the resume
        // point left behind by an earlier attempt.
        let checkpoint = self.tracker.snapshot();
        let final_checkpoint = (!checkpoint.is_empty()).then_some(checkpoint);

        if let Some(checkpoint) = &final_checkpoint {
            let persisted = self
                .store
                .persist_checkpoint(
                    self.config.connection_id,
                    self.attempt_id,
                    checkpoint.clone(),
                )
                .await;

            if let Err(err) = persisted {
                if cancelled {
                    // Cancellation must not turn into FAILED; the loss of the
                    // persisted resume point is surfaced loudly instead.
                    error!("failed to persist the checkpoint of a cancelled attempt: {err}");
                } else {
                    errors.push(err);
                }
            }
        }

        let status = if cancelled {
            AttemptStatus::Cancelled
        } else if !errors.is_empty() {
            AttemptStatus::Failed
        } else {
            AttemptStatus::Succeeded
        };

        let failure_reason = (status == AttemptStatus::Failed).then(|| {
            errors
                .iter()
                .map(|err| match err.detail() {
                    Some(detail) => format!("[{:?}] {detail}", err.kind()),
                    None => format!("[{:?}]", err.kind()),
                })
                .collect::<Vec<_>>()
                .join("; ")
        });

        self.registry.finalize(
            self.attempt_id,
            status,
            final_checkpoint,
            failure_reason,
            self.stats.snapshot(),
        )?;

        if status == AttemptStatus::Failed {
            return Err(errors.into());
        }

        // A fault that raced an explicit cancel does not override the
        // CANCELLED outcome, but it must not disappear either.
        for err in &errors {
            error!("error during cancelled attempt: {err}");
        }

        self.registry.get_attempt(self.attempt_id)
    }

    /// Requests cancellation of the attempt.
    ///
    /// Idempotent; a no-op once the attempt is terminal. The pipeline lanes
    /// observe the signal at their next iteration boundary.
    pub fn shutdown(&self) {
        info!(attempt_id = %self.attempt_id, "requesting pipeline cancellation");

        match self.registry.cancel(self.attempt_id) {
            Ok(true) => info!("cancellation requested"),
            Ok(false) => info!("attempt already terminal, nothing to cancel"),
            Err(err) => error!("failed to request cancellation: {err}"),
        }
    }

    /// Convenience wrapper for cancelling and waiting in one call.
    pub async fn shutdown_and_wait(self) -> SyncResult<Attempt> {
        self.shutdown();
        self.wait().await
    }
}

/// Loads the resume checkpoint for a connection and reports it.
///
/// Callers run this before building a pipeline for a new attempt; the
/// returned checkpoint (if any) is what the previous attempt confirmed, and
/// is typically handed to the source connector's configuration.
pub async fn load_resume_checkpoint<S>(
    store: &S,
    connection_id: crate::types::ConnectionId,
) -> SyncResult<Option<crate::types::Checkpoint>>
where
    S: StateStore,
{
    let checkpoint = store.load_checkpoint(connection_id).await?;

    match &checkpoint {
        Some(_) => info!(%connection_id, "resuming from a persisted checkpoint"),
        None => info!(%connection_id, "no persisted checkpoint, starting fresh"),
    }

    Ok(checkpoint)
}
