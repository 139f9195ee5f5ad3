//! Envelope validation for inbound messages
//!
//! Pure functions: nothing here touches the network or the database. Every
//! outcome other than a valid envelope is a [`FailureReason`], which the
//! processor hands to the dead-letter router.

use event_bus::missing_envelope_fields;
use serde_json::Value;
use std::fmt;

/// Why a message ended up in the DLQ
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Bytes were not UTF-8 JSON
    JsonDecode(String),
    /// Valid JSON, but not an object
    NotAnObject(&'static str),
    /// Mandatory envelope fields absent, in declaration order
    MissingFields(Vec<&'static str>),
    /// Rejected by the kind schema registry
    Schema(String),
    /// Mirroring (or any later step) failed
    Processing(String),
    /// Outbound publish gave up
    PublishExhausted { attempts: u32, detail: String },
}

impl FailureReason {
    /// Bounded label for the DLQ counter
    pub fn label(&self) -> &'static str {
        match self {
            FailureReason::JsonDecode(_) => "json_decode",
            FailureReason::NotAnObject(_) => "not_an_object",
            FailureReason::MissingFields(_) => "missing_fields",
            FailureReason::Schema(_) => "schema",
            FailureReason::Processing(_) => "processing",
            FailureReason::PublishExhausted { .. } => "publish",
        }
    }

    /// Validation failures are permanent for the message; the rest are not
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            FailureReason::JsonDecode(_)
                | FailureReason::NotAnObject(_)
                | FailureReason::MissingFields(_)
                | FailureReason::Schema(_)
        )
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::JsonDecode(detail) => write!(f, "JSON decode error: {}", detail),
            FailureReason::NotAnObject(found) => {
                write!(f, "Invalid envelope: expected JSON object, found {}", found)
            }
            FailureReason::MissingFields(fields) => {
                write!(f, "Missing fields: [{}]", fields.join(", "))
            }
            FailureReason::Schema(detail) => write!(f, "Schema validation failed: {}", detail),
            FailureReason::Processing(detail) => write!(f, "Processing error: {}", detail),
            FailureReason::PublishExhausted { attempts, detail } => {
                write!(f, "Publish failed after {} attempts: {}", attempts, detail)
            }
        }
    }
}

/// A validated inbound envelope
///
/// `document` is the full parsed object exactly as received; the metadata
/// fields are extracted for logging and metric labels.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEnvelope {
    pub trace_id: String,
    pub ts: String,
    pub kind: String,
    pub idempotency_key: String,
    pub document: Value,
}

impl InboundEnvelope {
    pub fn payload(&self) -> Option<&Value> {
        self.document.get("payload")
    }
}

/// Parse raw bytes and check the envelope contract
///
/// 1. UTF-8 JSON decode
/// 2. Must be an object
/// 3. `trace_id`, `ts`, `kind` and `idempotency_key` must all be present
pub fn validate(raw: &[u8]) -> Result<InboundEnvelope, FailureReason> {
    let document: Value =
        serde_json::from_slice(raw).map_err(|e| FailureReason::JsonDecode(e.to_string()))?;

    if !document.is_object() {
        return Err(FailureReason::NotAnObject(json_type(&document)));
    }

    let missing = missing_envelope_fields(&document);
    if !missing.is_empty() {
        return Err(FailureReason::MissingFields(missing));
    }

    Ok(InboundEnvelope {
        trace_id: field_text(&document, "trace_id"),
        ts: field_text(&document, "ts"),
        kind: field_text(&document, "kind"),
        idempotency_key: field_text(&document, "idempotency_key"),
        document,
    })
}

// Non-string values are kept as their JSON text
fn field_text(document: &Value, field: &str) -> String {
    match document.get(field) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
