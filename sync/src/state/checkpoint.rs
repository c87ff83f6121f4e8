use std::sync::{Arc, Mutex};

use crate::types::{Checkpoint, Message};

#[derive(Debug, Default)]
struct Inner {
    /// Latest STATE seen by the producer lane, per slot. Not yet durable.
    observed: Checkpoint,
    /// Latest STATE whose write the destination accepted. This is what
    /// `snapshot` exposes and what gets persisted.
    confirmed: Checkpoint,
}

/// Tracks the last durably observed checkpoint of a running attempt.
///
/// The tracker is the only state shared between the two pipeline lanes
/// besides the bounded channel, and it is internally serialized so that
/// `observe`, `confirm`, and `snapshot` may be called concurrently.
///
/// The producer lane calls [`CheckpointTracker::observe`] for every decoded
/// message; the consumer lane calls [`CheckpointTracker::confirm`] after the
/// destination's write for a STATE message returns. Because the channel is
/// FIFO and the consumer is the single writer, every RECORD emitted before a
/// confirmed STATE has already been handed to the destination — which is why
/// [`CheckpointTracker::snapshot`] may only ever expose confirmed state: a
/// resumed sync must not skip records the destination never actually wrote.
#[derive(Debug, Clone, Default)]
pub struct CheckpointTracker {
    inner: Arc<Mutex<Inner>>,
}

impl CheckpointTracker {
    /// Creates a tracker with no recorded state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a STATE message as observed by the producer lane.
    ///
    /// Non-STATE messages are no-ops. A first-seen STATE for a partition with
    /// no preceding RECORD is accepted immediately as authoritative. Returns
    /// whether the observed checkpoint changed; repeating identical STATE
    /// content changes nothing.
    pub fn observe(&self, message: &Message) -> bool {
        let Message::State(state) = message else {
            return false;
        };

        let mut inner = self.inner.lock().unwrap();
        inner
            .observed
            .set(state.partition.as_deref(), state.payload.clone())
    }

    /// Records a STATE message as confirmed: its write was accepted by the
    /// destination, and by FIFO ordering so were all records before it.
    ///
    /// Non-STATE messages are no-ops. Returns whether the confirmed
    /// checkpoint changed.
    pub fn confirm(&self, message: &Message) -> bool {
        let Message::State(state) = message else {
            return false;
        };

        let mut inner = self.inner.lock().unwrap();
        inner
            .confirmed
            .set(state.partition.as_deref(), state.payload.clone())
    }

    /// Returns a point-in-time copy of the confirmed checkpoint.
    pub fn snapshot(&self) -> Checkpoint {
        self.inner.lock().unwrap().confirmed.clone()
    }

    /// Returns a point-in-time copy of the observed (not yet durable)
    /// checkpoint. Diagnostics only; never persisted.
    pub fn observed(&self) -> Checkpoint {
        self.inner.lock().unwrap().observed.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn observe_tracks_latest_state_per_partition() {
        let tracker = CheckpointTracker::new();

        tracker.observe(&Message::state(Some("users"), json!({"cursor": 1})));
        tracker.observe(&Message::state(Some("users"), json!({"cursor": 2})));
        tracker.observe(&Message::state(Some("orders"), json!({"cursor": 9})));

        let observed = tracker.observed();
        assert_eq!(observed.get(Some("users")), Some(&json!({"cursor": 2})));
        assert_eq!(observed.get(Some("orders")), Some(&json!({"cursor": 9})));
    }

    #[test]
    fn snapshot_only_reflects_confirmed_state() {
        let tracker = CheckpointTracker::new();

        tracker.observe(&Message::state(Some("users"), json!({"cursor": 5})));
        assert!(tracker.snapshot().is_empty());

        tracker.confirm(&Message::state(Some("users"), json!({"cursor": 5})));
        assert_eq!(
            tracker.snapshot().get(Some("users")),
            Some(&json!({"cursor": 5}))
        );
    }

    #[test]
    fn records_and_logs_are_no_ops() {
        let tracker = CheckpointTracker::new();

        assert!(!tracker.observe(&Message::record("users", json!({"id": 1}))));
        assert!(!tracker.confirm(&Message::record("users", json!({"id": 1}))));
        assert!(tracker.snapshot().is_empty());
        assert!(tracker.observed().is_empty());
    }

    #[test]
    fn duplicate_state_content_is_idempotent() {
        let tracker = CheckpointTracker::new();
        let state = Message::state(None, json!({"cursor": 3}));

        assert!(tracker.confirm(&state));
        let first = tracker.snapshot();

        assert!(!tracker.confirm(&state));
        assert_eq!(tracker.snapshot(), first);
    }

    #[test]
    fn global_state_supersedes_earlier_global_state() {
        let tracker = CheckpointTracker::new();

        tracker.confirm(&Message::state(None, json!({"cursor": 1})));
        tracker.confirm(&Message::state(None, json!({"cursor": 2})));

        assert_eq!(tracker.snapshot().get(None), Some(&json!({"cursor": 2})));
    }
}
