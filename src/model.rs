//! Envelope & Event model (C1).
//!
//! In-memory types for CDC envelopes and decoded domain events, plus the
//! decode/validate boundary between "bytes off the log" and "event the
//! dispatcher can route."

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{DecodeError, ValidationError};

/// CDC operation code carried on every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Create,
    Update,
    Delete,
    Snapshot,
}

impl Op {
    fn from_char(c: char) -> Option<Self> {
        match c {
            'c' => Some(Op::Create),
            'u' => Some(Op::Update),
            'd' => Some(Op::Delete),
            'r' => Some(Op::Snapshot),
            _ => None,
        }
    }

    pub fn as_char(&self) -> char {
        match self {
            Op::Create => 'c',
            Op::Update => 'u',
            Op::Delete => 'd',
            Op::Snapshot => 'r',
        }
    }
}

/// The wire record delivered by the log for each change (spec.md §3).
#[derive(Debug, Clone)]
pub struct Envelope {
    pub op: Op,
    pub ts_ms: i64,
    pub before: Option<Value>,
    pub after: Value,
    pub source: Option<Value>,
}

impl Envelope {
    /// Decode raw log bytes into an envelope. Fails only on malformed JSON
    /// or a missing `op`/`ts_ms`/`after` key — `after`'s internal shape is
    /// validated later by [`Envelope::to_event`].
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let raw: Value = serde_json::from_slice(bytes)?;

        let op_str = raw
            .get("op")
            .and_then(Value::as_str)
            .ok_or(DecodeError::MissingField("op"))?;
        let op_char = op_str
            .chars()
            .next()
            .ok_or(DecodeError::MissingField("op"))?;
        let op = Op::from_char(op_char).ok_or(DecodeError::MissingField("op"))?;

        let ts_ms = raw
            .get("ts_ms")
            .and_then(Value::as_i64)
            .ok_or(DecodeError::MissingField("ts_ms"))?;

        let after = raw
            .get("after")
            .cloned()
            .ok_or(DecodeError::MissingField("after"))?;

        let before = raw.get("before").cloned();
        let source = raw.get("source").cloned();

        Ok(Envelope {
            op,
            ts_ms,
            before,
            after,
            source,
        })
    }

    /// True iff this envelope carries no domain event (delete or snapshot).
    pub fn should_skip(&self) -> bool {
        matches!(self.op, Op::Delete | Op::Snapshot)
    }

    /// Lift `after` into a domain [`OutboxEvent`]. Only valid for
    /// `op ∈ {c, u}`; callers must check [`Envelope::should_skip`] first.
    pub fn to_event(&self) -> Result<OutboxEvent, ValidationError> {
        if !matches!(self.op, Op::Create | Op::Update) {
            return Err(ValidationError::UnsupportedOp(self.op.as_char()));
        }

        let after = self
            .after
            .as_object()
            .ok_or(ValidationError::WrongType("after"))?;

        let get_str = |field: &'static str| -> Result<&str, ValidationError> {
            after
                .get(field)
                .and_then(Value::as_str)
                .ok_or(ValidationError::MissingField(field))
        };

        let get_uuid = |field: &'static str| -> Result<Uuid, ValidationError> {
            let s = get_str(field)?;
            Uuid::parse_str(s).map_err(|source| ValidationError::InvalidUuid { field, source })
        };

        let event_id = get_uuid("event_id")?;
        let aggregate_id = get_uuid("aggregate_id")?;
        let aggregate_type = get_str("aggregate_type")?.to_string();
        let event_type = get_str("event_type")?.to_string();

        let sequence_id = after
            .get("sequence_id")
            .and_then(Value::as_i64)
            .ok_or(ValidationError::MissingField("sequence_id"))?;

        let payload = after
            .get("payload")
            .cloned()
            .ok_or(ValidationError::MissingField("payload"))?;
        if !payload.is_object() {
            return Err(ValidationError::WrongType("payload"));
        }

        let status = get_str("status")?.parse::<EventStatus>()?;

        let retry_count = after
            .get("retry_count")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32;

        let last_error = after
            .get("last_error")
            .and_then(Value::as_str)
            .map(str::to_string);

        let created_at_raw = get_str("created_at")?;
        let created_at = DateTime::parse_from_rfc3339(created_at_raw)
            .map_err(|source| ValidationError::InvalidTimestamp {
                field: "created_at",
                source,
            })?
            .with_timezone(&Utc);

        Ok(OutboxEvent {
            event_id,
            sequence_id,
            aggregate_id,
            aggregate_type,
            event_type,
            payload,
            status,
            retry_count,
            last_error,
            created_at,
        })
    }
}

/// Event processing status, carried through but never mutated by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Processing,
    Processed,
    Failed,
}

impl std::str::FromStr for EventStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EventStatus::Pending),
            "processing" => Ok(EventStatus::Processing),
            "processed" => Ok(EventStatus::Processed),
            "failed" => Ok(EventStatus::Failed),
            other => Err(ValidationError::UnknownStatus(other.to_string())),
        }
    }
}

/// The decoded domain event handed to handlers (spec.md §3).
#[derive(Debug, Clone)]
pub struct OutboxEvent {
    pub event_id: Uuid,
    pub sequence_id: i64,
    pub aggregate_id: Uuid,
    pub aggregate_type: String,
    pub event_type: String,
    pub payload: Value,
    pub status: EventStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl OutboxEvent {
    /// Convenience accessor into the payload object; handlers perform their
    /// own required-field extraction per spec.md §9 ("free-form payload").
    pub fn payload_str(&self, field: &str) -> Option<&str> {
        self.payload.get(field).and_then(Value::as_str)
    }

    pub fn payload_field(&self, field: &str) -> Option<&Value> {
        self.payload.get(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_after(event_type: &str) -> Value {
        serde_json::json!({
            "event_id": "11111111-1111-1111-1111-111111111111",
            "sequence_id": 1,
            "aggregate_id": "22222222-2222-2222-2222-222222222222",
            "aggregate_type": "User",
            "event_type": event_type,
            "payload": { "email": "a@x.com" },
            "status": "pending",
            "retry_count": 0,
            "created_at": "2024-01-01T12:00:00Z",
        })
    }

    #[test]
    fn decodes_well_formed_envelope() {
        let bytes = serde_json::json!({
            "op": "c",
            "ts_ms": 1_700_000_000_000i64,
            "after": sample_after("UserCreated"),
        })
        .to_string();

        let envelope = Envelope::decode(bytes.as_bytes()).unwrap();
        assert_eq!(envelope.op, Op::Create);
        assert!(!envelope.should_skip());
    }

    #[test]
    fn decode_rejects_missing_required_key() {
        let bytes = serde_json::json!({ "op": "c", "ts_ms": 1 }).to_string();
        let err = Envelope::decode(bytes.as_bytes()).unwrap_err();
        assert!(matches!(err, DecodeError::MissingField("after")));
    }

    #[test]
    fn delete_and_snapshot_are_skipped() {
        for op in ["d", "r"] {
            let bytes = serde_json::json!({
                "op": op,
                "ts_ms": 1,
                "after": sample_after("UserCreated"),
            })
            .to_string();
            let envelope = Envelope::decode(bytes.as_bytes()).unwrap();
            assert!(envelope.should_skip());
        }
    }

    #[test]
    fn to_event_extracts_all_fields() {
        let bytes = serde_json::json!({
            "op": "c",
            "ts_ms": 1,
            "after": sample_after("UserCreated"),
        })
        .to_string();
        let envelope = Envelope::decode(bytes.as_bytes()).unwrap();
        let event = envelope.to_event().unwrap();
        assert_eq!(event.event_type, "UserCreated");
        assert_eq!(event.status, EventStatus::Pending);
        assert_eq!(event.payload_str("email"), Some("a@x.com"));
    }

    #[test]
    fn to_event_rejects_invalid_uuid() {
        let mut after = sample_after("UserCreated");
        after["aggregate_id"] = serde_json::json!("not-a-uuid");
        let bytes = serde_json::json!({ "op": "c", "ts_ms": 1, "after": after }).to_string();
        let envelope = Envelope::decode(bytes.as_bytes()).unwrap();
        let err = envelope.to_event().unwrap_err();
        assert!(matches!(err, ValidationError::InvalidUuid { field: "aggregate_id", .. }));
    }

    #[test]
    fn to_event_rejects_delete_op() {
        let bytes = serde_json::json!({
            "op": "d",
            "ts_ms": 1,
            "after": sample_after("UserCreated"),
        })
        .to_string();
        let envelope = Envelope::decode(bytes.as_bytes()).unwrap();
        let err = envelope.to_event().unwrap_err();
        assert!(matches!(err, ValidationError::UnsupportedOp('d')));
    }
}
