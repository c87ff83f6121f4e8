use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Aggregate counters for one attempt, reported in the sync summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    /// Records decoded from the source output stream.
    pub records_read: u64,
    /// Records whose write the destination accepted.
    pub records_written: u64,
    /// STATE messages seen by the producer lane.
    pub states_observed: u64,
    /// STATE messages confirmed by the consumer lane.
    pub states_confirmed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    records_read: AtomicU64,
    records_written: AtomicU64,
    states_observed: AtomicU64,
    states_confirmed: AtomicU64,
}

/// Shared counters both lanes update while an attempt runs.
///
/// Lock-free so that counting never contends with the data path; the
/// orchestrator snapshots the totals at finalize time, including for failed
/// and cancelled attempts.
#[derive(Debug, Clone, Default)]
pub struct StatsTracker {
    counters: Arc<Counters>,
}

impl StatsTracker {
    /// Creates a tracker with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_read(&self) {
        self.counters.records_read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_written(&self) {
        self.counters
            .records_written
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn state_observed(&self) {
        self.counters
            .states_observed
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn state_confirmed(&self) {
        self.counters
            .states_confirmed
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time copy of all counters.
    pub fn snapshot(&self) -> SyncStats {
        SyncStats {
            records_read: self.counters.records_read.load(Ordering::Relaxed),
            records_written: self.counters.records_written.load(Ordering::Relaxed),
            states_observed: self.counters.states_observed.load(Ordering::Relaxed),
            states_confirmed: self.counters.states_confirmed.load(Ordering::Relaxed),
        }
    }
}
