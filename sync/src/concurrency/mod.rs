//! Concurrency primitives coordinating the two pipeline lanes.
//!
//! The producer lane (parse + enqueue) and the consumer lane (dequeue +
//! write) run as independently scheduled tasks that share exactly two
//! structures: the bounded channel in [`channel`], which is the sole
//! backpressure mechanism, and the checkpoint tracker. Cancellation is
//! broadcast through the watch-based primitive in [`shutdown`] and observed
//! cooperatively by both lanes at iteration boundaries.

pub mod channel;
pub mod shutdown;
