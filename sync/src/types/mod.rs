//! Core data model for the sync engine.

mod checkpoint;
mod message;

pub use checkpoint::*;
pub use message::*;

use uuid::Uuid;

/// Unique identifier of a pipeline.
pub type PipelineId = u64;

/// Unique identifier of one execution try of a sync job.
pub type AttemptId = Uuid;

/// Unique identifier of a sync job.
pub type JobId = Uuid;

/// Unique identifier of the connection a pipeline syncs.
pub type ConnectionId = Uuid;
