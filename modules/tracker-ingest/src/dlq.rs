//! Dead Letter Queue (DLQ) routing
//!
//! Every failed message is republished to a derived DLQ topic (best effort,
//! only while a broker session is live) and always recorded in `dlq_events`.
//! Nothing here returns an error: failures inside the DLQ path are logged so
//! they can never feed back into another DLQ round.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::connection::LiveConnection;
use crate::metrics::IngestMetrics;
use crate::store::EventStore;
use crate::validation::FailureReason;

/// DLQ topic for an original topic: `<dlq_root>/<topic with '/' replaced by '_'>`
pub fn dlq_topic(dlq_root: &str, original_topic: &str) -> String {
    format!("{}/{}", dlq_root, original_topic.replace('/', "_"))
}

/// What failed: the raw bytes when parsing never succeeded, the parsed document otherwise
#[derive(Debug, Clone, PartialEq)]
pub enum DlqPayload {
    Raw(Vec<u8>),
    Structured(Value),
}

impl DlqPayload {
    fn into_value(self) -> Value {
        match self {
            DlqPayload::Raw(bytes) => Value::String(String::from_utf8_lossy(&bytes).into_owned()),
            DlqPayload::Structured(value) => value,
        }
    }
}

/// Diagnostic wrapper published to the DLQ topic and stored in `dlq_events.payload`
#[derive(Debug, Clone, Serialize)]
pub struct DlqEnvelope {
    pub original_topic: String,
    pub failure_reason: String,
    pub failure_timestamp: String,
    pub payload: Value,
}

impl DlqEnvelope {
    pub fn new(
        original_topic: &str,
        payload: DlqPayload,
        reason: &FailureReason,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            original_topic: original_topic.to_string(),
            failure_reason: reason.to_string(),
            failure_timestamp: at.to_rfc3339_opts(SecondsFormat::Micros, true),
            payload: payload.into_value(),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "original_topic": self.original_topic,
            "failure_reason": self.failure_reason,
            "failure_timestamp": self.failure_timestamp,
            "payload": self.payload,
        })
    }
}

/// What happened to one dead letter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadLetterOutcome {
    pub republished: bool,
    pub recorded: bool,
}

/// Sole writer of `dlq_events`
#[derive(Clone)]
pub struct DeadLetterRouter {
    store: Arc<dyn EventStore>,
    connection: LiveConnection,
    metrics: IngestMetrics,
    dlq_root: String,
}

impl DeadLetterRouter {
    pub fn new(
        store: Arc<dyn EventStore>,
        connection: LiveConnection,
        metrics: IngestMetrics,
        dlq_root: impl Into<String>,
    ) -> Self {
        Self {
            store,
            connection,
            metrics,
            dlq_root: dlq_root.into(),
        }
    }

    pub async fn dead_letter(
        &self,
        original_topic: &str,
        payload: DlqPayload,
        reason: &FailureReason,
    ) -> DeadLetterOutcome {
        let envelope = DlqEnvelope::new(original_topic, payload, reason, Utc::now());
        let document = envelope.to_value();
        let topic = dlq_topic(&self.dlq_root, original_topic);

        // Bad input is the sender's problem; anything else is ours
        if reason.is_validation() {
            tracing::warn!(
                original_topic = %original_topic,
                dlq_topic = %topic,
                reason = %envelope.failure_reason,
                "Routing invalid message to DLQ"
            );
        } else {
            tracing::error!(
                original_topic = %original_topic,
                dlq_topic = %topic,
                reason = %envelope.failure_reason,
                "Routing failed message to DLQ"
            );
        }

        let republished = self.republish(&topic, &document).await;

        let recorded = match self
            .store
            .insert_dlq(original_topic, &envelope.failure_reason, &document)
            .await
        {
            Ok(id) => {
                tracing::debug!(original_topic = %original_topic, dlq_id = id, "DLQ record stored");
                true
            }
            Err(e) => {
                tracing::error!(
                    original_topic = %original_topic,
                    reason = %envelope.failure_reason,
                    error = %e,
                    "Failed to store DLQ record"
                );
                false
            }
        };

        if !republished && !recorded {
            // Last trace of this message
            tracing::error!(
                original_topic = %original_topic,
                dlq_envelope = %document,
                "DLQ publish and insert both failed; message survives only in this log line"
            );
        }

        self.metrics
            .dlq_total
            .with_label_values(&[original_topic, reason.label()])
            .inc();

        DeadLetterOutcome {
            republished,
            recorded,
        }
    }

    async fn republish(&self, topic: &str, document: &Value) -> bool {
        let Some(publisher) = self.connection.current().await else {
            tracing::debug!(dlq_topic = %topic, "No live broker session, skipping DLQ republish");
            return false;
        };

        let bytes = match serde_json::to_vec(document) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(dlq_topic = %topic, error = %e, "Failed to serialize DLQ envelope");
                return false;
            }
        };

        match publisher.publish(topic, bytes).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(dlq_topic = %topic, error = %e, "DLQ republish failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryEventStore;
    use event_bus::InMemoryBus;
    use serde_json::json;

    fn router(store: &InMemoryEventStore, connection: LiveConnection) -> (DeadLetterRouter, IngestMetrics) {
        let metrics = IngestMetrics::new().unwrap();
        let router = DeadLetterRouter::new(
            Arc::new(store.clone()),
            connection,
            metrics.clone(),
            "tracker/dlq",
        );
        (router, metrics)
    }

    #[test]
    fn test_dlq_topic_sanitises_every_separator() {
        assert_eq!(
            dlq_topic("tracker/dlq", "tracker/events/projects/created"),
            "tracker/dlq/tracker_events_projects_created"
        );
        assert_eq!(dlq_topic("dlq", "flat"), "dlq/flat");
    }

    #[test]
    fn test_raw_payload_is_decoded_lossily() {
        let env = DlqEnvelope::new(
            "t",
            DlqPayload::Raw(vec![b'o', b'k', 0xff]),
            &FailureReason::JsonDecode("bad".to_string()),
            Utc::now(),
        );
        assert_eq!(env.payload, json!("ok\u{fffd}"));
        assert!(env.failure_timestamp.ends_with('Z'));
    }

    #[tokio::test]
    async fn test_records_without_live_connection() {
        let store = InMemoryEventStore::new();
        let (router, metrics) = router(&store, LiveConnection::new());

        let outcome = router
            .dead_letter(
                "tracker/commands/sync",
                DlqPayload::Raw(b"{".to_vec()),
                &FailureReason::JsonDecode("EOF".to_string()),
            )
            .await;

        assert_eq!(
            outcome,
            DeadLetterOutcome {
                republished: false,
                recorded: true
            }
        );
        let rows = store.dlq_records().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].original_topic, "tracker/commands/sync");
        assert_eq!(rows[0].failure_reason, "JSON decode error: EOF");
        assert_eq!(rows[0].payload["payload"], json!("{"));
        assert_eq!(
            metrics
                .dlq_total
                .with_label_values(&["tracker/commands/sync", "json_decode"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn test_republishes_to_derived_topic_when_live() {
        let store = InMemoryEventStore::new();
        let bus = InMemoryBus::new();
        let live = LiveConnection::new();
        live.set(Arc::new(bus.clone())).await;
        let (router, _) = router(&store, live);

        let doc = json!({"kind": "x"});
        let outcome = router
            .dead_letter(
                "tracker/events/a/b",
                DlqPayload::Structured(doc.clone()),
                &FailureReason::Processing("boom".to_string()),
            )
            .await;

        assert!(outcome.republished && outcome.recorded);
        let published = bus.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].subject, "tracker/dlq/tracker_events_a_b");

        let body: Value = serde_json::from_slice(&published[0].payload).unwrap();
        assert_eq!(body["payload"], doc);
        assert_eq!(body["failure_reason"], "Processing error: boom");
    }

    #[tokio::test]
    async fn test_double_failure_is_swallowed() {
        let store = InMemoryEventStore::new();
        store.fail_dlq_writes(true);
        let bus = InMemoryBus::new();
        bus.reject_publishes(true);
        let live = LiveConnection::new();
        live.set(Arc::new(bus)).await;
        let (router, metrics) = router(&store, live);

        let outcome = router
            .dead_letter(
                "tracker/metrics/cpu",
                DlqPayload::Raw(b"x".to_vec()),
                &FailureReason::NotAnObject("string"),
            )
            .await;

        assert!(!outcome.republished && !outcome.recorded);
        assert_eq!(
            metrics
                .dlq_total
                .with_label_values(&["tracker/metrics/cpu", "not_an_object"])
                .get(),
            1
        );
    }
}
