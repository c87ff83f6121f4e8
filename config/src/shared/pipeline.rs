use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::shared::ValidationError;

/// Default number of messages the bounded channel may buffer.
const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Default time adapters get to exit voluntarily after a terminate signal.
const DEFAULT_GRACE_PERIOD_MS: u64 = 10_000;

/// Configuration for a sync pipeline run.
///
/// This struct holds everything the orchestrator needs to execute one attempt:
/// the identity of the pipeline and of the connection it syncs, channel sizing,
/// and the shutdown/timeout knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PipelineConfig {
    /// Unique identifier of the pipeline.
    pub id: u64,
    /// Identifier of the connection this pipeline syncs. Checkpoints are
    /// persisted and reloaded per connection to support resumption across
    /// attempts.
    pub connection_id: Uuid,
    /// Bounded channel configuration, the sole backpressure mechanism between
    /// the producer and consumer lanes.
    #[serde(default)]
    pub channel: ChannelConfig,
    /// How long adapters get to exit on their own after a terminate signal
    /// before being force-killed, in milliseconds.
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
    /// Optional upper bound on the wall-clock duration of one attempt, in
    /// milliseconds. On expiry the attempt follows the cancellation path.
    #[serde(default)]
    pub max_attempt_duration_ms: Option<u64>,
}

impl PipelineConfig {
    /// Validates the [`PipelineConfig`].
    ///
    /// Returns the first violated constraint, if any.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.channel.validate()?;

        if self.grace_period_ms == 0 {
            return Err(ValidationError::ZeroGracePeriod);
        }

        if self.max_attempt_duration_ms == Some(0) {
            return Err(ValidationError::ZeroMaxAttemptDuration);
        }

        Ok(())
    }
}

/// Sizing of the bounded message channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ChannelConfig {
    /// Maximum number of messages buffered between producer and consumer. A
    /// slow consumer suspends the producer once this many messages are in
    /// flight; messages are never dropped or reordered.
    pub capacity: usize,
}

impl ChannelConfig {
    /// Validates the [`ChannelConfig`].
    ///
    /// Returns [`ValidationError::ZeroChannelCapacity`] for an empty channel,
    /// which could never make progress.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.capacity == 0 {
            return Err(ValidationError::ZeroChannelCapacity);
        }

        Ok(())
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

fn default_grace_period_ms() -> u64 {
    DEFAULT_GRACE_PERIOD_MS
}
