use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The latest confirmed resumption point for a sync.
///
/// A [`Checkpoint`] holds the most recently observed STATE per partition key
/// plus an optional global slot for unpartitioned state. It is the only thing
/// the engine ever persists: individual messages are transient.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Global state blob, when the source emits unpartitioned STATE.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global: Option<Value>,
    /// Per-partition state blobs, keyed by partition key.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub partitions: BTreeMap<String, Value>,
}

impl Checkpoint {
    /// Returns true when no state has been recorded in any slot.
    pub fn is_empty(&self) -> bool {
        self.global.is_none() && self.partitions.is_empty()
    }

    /// Returns the state blob for `partition`, or the global slot when
    /// `partition` is [`None`].
    pub fn get(&self, partition: Option<&str>) -> Option<&Value> {
        match partition {
            Some(key) => self.partitions.get(key),
            None => self.global.as_ref(),
        }
    }

    /// Records `payload` for `partition` (or the global slot), superseding any
    /// earlier value.
    ///
    /// Returns false when the slot already held an identical value, making
    /// repeated identical STATE messages idempotent no-ops.
    pub fn set(&mut self, partition: Option<&str>, payload: Value) -> bool {
        match partition {
            Some(key) => {
                if self.partitions.get(key) == Some(&payload) {
                    return false;
                }
                self.partitions.insert(key.to_owned(), payload);
            }
            None => {
                if self.global.as_ref() == Some(&payload) {
                    return false;
                }
                self.global = Some(payload);
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn later_state_supersedes_earlier_for_same_partition() {
        let mut checkpoint = Checkpoint::default();

        assert!(checkpoint.set(Some("users"), json!({"cursor": 1})));
        assert!(checkpoint.set(Some("users"), json!({"cursor": 2})));

        assert_eq!(checkpoint.get(Some("users")), Some(&json!({"cursor": 2})));
    }

    #[test]
    fn global_and_partitioned_slots_are_independent() {
        let mut checkpoint = Checkpoint::default();

        checkpoint.set(None, json!({"cursor": 10}));
        checkpoint.set(Some("orders"), json!({"cursor": 5}));

        assert_eq!(checkpoint.get(None), Some(&json!({"cursor": 10})));
        assert_eq!(checkpoint.get(Some("orders")), Some(&json!({"cursor": 5})));
        assert!(checkpoint.get(Some("users")).is_none());
    }

    #[test]
    fn identical_value_is_an_idempotent_no_op() {
        let mut checkpoint = Checkpoint::default();

        assert!(checkpoint.set(Some("users"), json!({"cursor": 1})));
        assert!(!checkpoint.set(Some("users"), json!({"cursor": 1})));

        assert!(checkpoint.set(None, json!({"cursor": 1})));
        assert!(!checkpoint.set(None, json!({"cursor": 1})));
    }

    #[test]
    fn empty_checkpoint_reports_empty() {
        let mut checkpoint = Checkpoint::default();
        assert!(checkpoint.is_empty());

        checkpoint.set(None, json!({}));
        assert!(!checkpoint.is_empty());
    }
}
