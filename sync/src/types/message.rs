use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A protocol message exchanged between connectors.
///
/// [`Message`] is the discriminated union flowing through the pipeline. The
/// wire form is one JSON object per line with the envelope field set
/// `{type, stream?, partition?, payload}`, where `type` selects the variant.
///
/// Messages are transient: they are decoded, moved through the bounded
/// channel, and handed to the destination. Only the [`Checkpoint`] derived
/// from STATE messages is ever persisted.
///
/// [`Checkpoint`]: crate::types::Checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum Message {
    /// A data record belonging to a named stream.
    Record(RecordMessage),
    /// A cumulative state blob, optionally scoped to a partition key.
    State(StateMessage),
    /// A log line emitted by a connector; observability only.
    Log(LogMessage),
    /// A trace/diagnostic payload emitted by a connector; observability only.
    Trace(TraceMessage),
    /// A control payload forwarded verbatim to the destination.
    Control(ControlMessage),
}

/// A RECORD message: one row of data for a logical stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMessage {
    /// Name of the logical data stream (table/resource) this record belongs to.
    pub stream: String,
    /// Opaque field map; values may be arbitrarily nested.
    pub payload: Value,
}

/// A STATE message: a resumption point emitted by the source.
///
/// State is cumulative: a later STATE supersedes all prior state for the same
/// partition key, and a global STATE (no partition) supersedes any earlier
/// global STATE.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMessage {
    /// Stream-scoped partition key; absent for global state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<String>,
    /// Opaque state blob.
    pub payload: Value,
}

/// A LOG message emitted by a connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogMessage {
    /// Severity the connector assigned to the line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<LogLevel>,
    /// Opaque log payload, typically `{"message": "..."}`.
    pub payload: Value,
}

/// A TRACE message emitted by a connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceMessage {
    /// Opaque trace payload.
    pub payload: Value,
}

/// A CONTROL message emitted by a connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlMessage {
    /// Opaque control payload.
    pub payload: Value,
}

/// Severity levels connectors may attach to LOG messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Discriminant of a [`Message`], useful for logging, stats, and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Record,
    State,
    Log,
    Trace,
    Control,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::Record => "RECORD",
            MessageKind::State => "STATE",
            MessageKind::Log => "LOG",
            MessageKind::Trace => "TRACE",
            MessageKind::Control => "CONTROL",
        };
        f.write_str(name)
    }
}

impl Message {
    /// Builds a RECORD message.
    pub fn record(stream: impl Into<String>, payload: Value) -> Self {
        Message::Record(RecordMessage {
            stream: stream.into(),
            payload,
        })
    }

    /// Builds a STATE message, globally scoped when `partition` is [`None`].
    pub fn state(partition: Option<&str>, payload: Value) -> Self {
        Message::State(StateMessage {
            partition: partition.map(ToOwned::to_owned),
            payload,
        })
    }

    /// Builds a LOG message with the given severity.
    pub fn log(level: LogLevel, payload: Value) -> Self {
        Message::Log(LogMessage {
            level: Some(level),
            payload,
        })
    }

    /// Returns the discriminant of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Record(_) => MessageKind::Record,
            Message::State(_) => MessageKind::State,
            Message::Log(_) => MessageKind::Log,
            Message::Trace(_) => MessageKind::Trace,
            Message::Control(_) => MessageKind::Control,
        }
    }

    /// Returns true for message kinds the consumer lane forwards to the
    /// destination (RECORD, STATE, CONTROL). LOG and TRACE only affect
    /// observability.
    pub fn is_forwarded(&self) -> bool {
        matches!(
            self,
            Message::Record(_) | Message::State(_) | Message::Control(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_round_trips_through_envelope() {
        let message = Message::record("users", json!({"id": 1, "name": "ada"}));

        let line = serde_json::to_string(&message).unwrap();
        assert!(line.contains(r#""type":"RECORD""#));
        assert!(line.contains(r#""stream":"users""#));

        let decoded: Message = serde_json::from_str(&line).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn state_partition_is_optional_on_the_wire() {
        let global: Message =
            serde_json::from_str(r#"{"type": "STATE", "payload": {"cursor": 3}}"#).unwrap();
        let Message::State(state) = &global else {
            panic!("expected state message");
        };
        assert!(state.partition.is_none());

        let scoped: Message = serde_json::from_str(
            r#"{"type": "STATE", "partition": "users", "payload": {"cursor": 3}}"#,
        )
        .unwrap();
        let Message::State(state) = &scoped else {
            panic!("expected state message");
        };
        assert_eq!(state.partition.as_deref(), Some("users"));
    }

    #[test]
    fn log_and_trace_are_not_forwarded() {
        assert!(!Message::log(LogLevel::Info, json!({"message": "hi"})).is_forwarded());
        assert!(
            !Message::Trace(TraceMessage {
                payload: json!({})
            })
            .is_forwarded()
        );
        assert!(Message::record("s", json!({})).is_forwarded());
        assert!(Message::state(None, json!({})).is_forwarded());
    }

    #[test]
    fn unknown_type_tag_fails_to_decode() {
        let result = serde_json::from_str::<Message>(r#"{"type": "BOGUS", "payload": {}}"#);
        assert!(result.is_err());
    }
}
