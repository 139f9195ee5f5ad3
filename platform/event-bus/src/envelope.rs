//! # Event Envelope
//!
//! Wire envelope carried by every tracker domain event.
//!
//! ## Envelope Fields
//!
//! - `trace_id`: Correlates one logical operation across services (UUID)
//! - `ts`: ISO 8601 timestamp when the event was created
//! - `kind`: Dotted event type name (e.g., `project.created`)
//! - `idempotency_key`: Identifies one publish call, lets consumers dedup redeliveries
//! - `payload`: Event-specific data (generic type parameter)
//!
//! The four metadata fields are mandatory. Consumers check their presence with
//! [`missing_envelope_fields`] before anything else touches the message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Mandatory envelope fields, in the order failures report them
pub const REQUIRED_FIELDS: [&str; 4] = ["trace_id", "ts", "kind", "idempotency_key"];

/// Standard tracker event envelope
///
/// # Type Parameter
///
/// * `T` - The event-specific payload type
///
/// # Examples
///
/// ```rust
/// use event_bus::EventEnvelope;
/// use serde_json::json;
///
/// let envelope = EventEnvelope::new(
///     "project.created",
///     json!({"project_id": "p1", "name": "Demo"}),
/// )
/// .with_trace_id("550e8400-e29b-41d4-a716-446655440000".to_string());
///
/// assert!(envelope.idempotency_key.starts_with("project.created_"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope<T> {
    /// Correlation identifier for the logical operation
    pub trace_id: String,

    /// ISO 8601 timestamp when the envelope was built
    pub ts: DateTime<Utc>,

    /// Dotted event type name
    pub kind: String,

    /// Unique per publish call
    pub idempotency_key: String,

    /// Event-specific payload
    pub payload: T,
}

impl<T> EventEnvelope<T> {
    /// Create a new envelope with a random trace id, the current time and a
    /// fresh idempotency key
    pub fn new(kind: impl Into<String>, payload: T) -> Self {
        let kind = kind.into();
        Self {
            trace_id: Uuid::new_v4().to_string(),
            ts: Utc::now(),
            idempotency_key: idempotency_key(&kind),
            kind,
            payload,
        }
    }

    /// Continue an existing trace instead of starting a new one
    pub fn with_trace_id(mut self, trace_id: String) -> Self {
        self.trace_id = trace_id;
        self
    }
}

/// Build an idempotency key: `<kind>_<unix millis>_<8 random hex chars>`
pub fn idempotency_key(kind: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}_{}_{}", kind, Utc::now().timestamp_millis(), &suffix[..8])
}

/// Names of the mandatory envelope fields absent from `envelope`
///
/// Only presence is checked; value types are the schema registry's concern.
/// A non-object value is missing every field.
pub fn missing_envelope_fields(envelope: &serde_json::Value) -> Vec<&'static str> {
    REQUIRED_FIELDS
        .iter()
        .copied()
        .filter(|field| envelope.get(field).is_none())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_creation() {
        let envelope = EventEnvelope::new("project.created", json!({"project_id": "p1"}));

        assert_eq!(envelope.kind, "project.created");
        assert!(Uuid::parse_str(&envelope.trace_id).is_ok());
        assert_eq!(envelope.payload["project_id"], "p1");
    }

    #[test]
    fn test_envelope_keeps_supplied_trace_id() {
        let envelope = EventEnvelope::new("task.assigned", json!({}))
            .with_trace_id("trace-abc".to_string());

        assert_eq!(envelope.trace_id, "trace-abc");
    }

    #[test]
    fn test_idempotency_key_shape() {
        let key = idempotency_key("component.linked");
        let parts: Vec<&str> = key.rsplitn(3, '_').collect();

        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 8);
        assert!(parts[0].chars().all(|c| c.is_ascii_hexdigit()));
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2], "component.linked");
    }

    #[test]
    fn test_idempotency_keys_differ_between_calls() {
        assert_ne!(idempotency_key("x"), idempotency_key("x"));
    }

    #[test]
    fn test_serialized_envelope_has_all_required_fields() {
        let envelope = EventEnvelope::new("project.created", json!({"name": "Demo"}));
        let value = serde_json::to_value(&envelope).unwrap();

        assert!(missing_envelope_fields(&value).is_empty());
        assert!(value["ts"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_missing_fields_reported_in_order() {
        let envelope = json!({
            "kind": "x",
            "payload": {}
        });

        assert_eq!(
            missing_envelope_fields(&envelope),
            vec!["trace_id", "ts", "idempotency_key"]
        );
    }

    #[test]
    fn test_non_object_misses_everything() {
        assert_eq!(missing_envelope_fields(&json!([1, 2])), REQUIRED_FIELDS.to_vec());
        assert_eq!(missing_envelope_fields(&json!("text")), REQUIRED_FIELDS.to_vec());
    }
}
