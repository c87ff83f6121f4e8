use uuid::Uuid;

use crate::adapters::base::{DestinationAdapter, SourceAdapter};
use crate::config::{ChannelConfig, PipelineConfig};
use crate::error::SyncResult;
use crate::pipeline::SyncPipeline;
use crate::state::lifecycle::AttemptRegistry;
use crate::store::state::StateStore;
use crate::types::{ConnectionId, PipelineId};

/// Grace period used by test pipelines; short so teardown never dominates a
/// test's runtime.
const TEST_GRACE_PERIOD_MS: u64 = 1_000;

/// Builder for creating test pipelines with configurable options.
///
/// All options default to values suited for tests: a small channel, a short
/// grace period, no attempt timeout, and a fresh registry.
pub struct PipelineBuilder<Src, Dst, S> {
    source: Src,
    destination: Dst,
    store: S,
    registry: AttemptRegistry,
    pipeline_id: PipelineId,
    connection_id: ConnectionId,
    capacity: usize,
    grace_period_ms: u64,
    max_attempt_duration_ms: Option<u64>,
}

impl<Src, Dst, S> PipelineBuilder<Src, Dst, S>
where
    Src: SourceAdapter + Clone + Send + Sync + 'static,
    Dst: DestinationAdapter + Clone + Send + Sync + 'static,
    S: StateStore + Clone + Send + Sync + 'static,
{
    /// Creates a builder with test defaults.
    pub fn new(source: Src, destination: Dst, store: S) -> Self {
        Self {
            source,
            destination,
            store,
            registry: AttemptRegistry::new(),
            pipeline_id: 1,
            connection_id: Uuid::new_v4(),
            capacity: 16,
            grace_period_ms: TEST_GRACE_PERIOD_MS,
            max_attempt_duration_ms: None,
        }
    }

    /// Uses a shared registry instead of a fresh one.
    pub fn with_registry(mut self, registry: AttemptRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Sets the bounded channel capacity.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Pins the connection identifier, e.g. to test resumption across
    /// attempts.
    pub fn with_connection_id(mut self, connection_id: ConnectionId) -> Self {
        self.connection_id = connection_id;
        self
    }

    /// Bounds the attempt's wall-clock duration.
    pub fn with_max_attempt_duration_ms(mut self, limit: u64) -> Self {
        self.max_attempt_duration_ms = Some(limit);
        self
    }

    /// Builds the pipeline, returning it together with the registry it
    /// reports into.
    pub fn build(self) -> SyncResult<(SyncPipeline<Src, Dst, S>, AttemptRegistry)> {
        let config = PipelineConfig {
            id: self.pipeline_id,
            connection_id: self.connection_id,
            channel: ChannelConfig {
                capacity: self.capacity,
            },
            grace_period_ms: self.grace_period_ms,
            max_attempt_duration_ms: self.max_attempt_duration_ms,
        };

        let registry = self.registry;
        let pipeline = SyncPipeline::new(
            config,
            Uuid::new_v4(),
            registry.clone(),
            self.source,
            self.destination,
            self.store,
        )?;

        Ok((pipeline, registry))
    }
}

/// Creates a pipeline with default test configuration and the given channel
/// capacity.
pub fn create_pipeline<Src, Dst, S>(
    source: Src,
    destination: Dst,
    store: S,
    capacity: usize,
) -> SyncResult<(SyncPipeline<Src, Dst, S>, AttemptRegistry)>
where
    Src: SourceAdapter + Clone + Send + Sync + 'static,
    Dst: DestinationAdapter + Clone + Send + Sync + 'static,
    S: StateStore + Clone + Send + Sync + 'static,
{
    PipelineBuilder::new(source, destination, store)
        .with_capacity(capacity)
        .build()
}
