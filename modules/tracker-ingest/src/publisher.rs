//! Outbound event publishing over the supervisor's live broker session

use event_bus::retry::{retry_with_backoff, RetryConfig};
use event_bus::{BusError, EventEnvelope};
use serde_json::Value;

use crate::connection::LiveConnection;
use crate::dlq::{DeadLetterRouter, DlqPayload};
use crate::metrics::IngestMetrics;
use crate::validation::FailureReason;

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("publish to {topic} failed after {attempts} attempts (trace_id {trace_id}): {source}")]
    Exhausted {
        topic: String,
        attempts: u32,
        trace_id: String,
        source: BusError,
    },

    #[error("failed to serialize envelope: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Wraps payloads in the event envelope and hands them to the broker
///
/// Failed attempts are retried after 2s, 4s, 8s then every 10s. When the
/// budget runs out the envelope is dead-lettered and the caller gets an error.
#[derive(Clone)]
pub struct EventPublisher {
    connection: LiveConnection,
    router: DeadLetterRouter,
    metrics: IngestMetrics,
    max_retries: u32,
}

impl EventPublisher {
    pub fn new(
        connection: LiveConnection,
        router: DeadLetterRouter,
        metrics: IngestMetrics,
        max_retries: u32,
    ) -> Self {
        Self {
            connection,
            router,
            metrics,
            max_retries,
        }
    }

    /// Publish with the configured attempt budget, returning the trace id
    pub async fn publish(
        &self,
        topic: &str,
        kind: &str,
        payload: Value,
        trace_id: Option<String>,
    ) -> Result<String, PublishError> {
        self.publish_with_retries(topic, kind, payload, trace_id, self.max_retries)
            .await
    }

    /// `max_retries` is the total number of attempts for this call
    pub async fn publish_with_retries(
        &self,
        topic: &str,
        kind: &str,
        payload: Value,
        trace_id: Option<String>,
        max_retries: u32,
    ) -> Result<String, PublishError> {
        let mut envelope = EventEnvelope::new(kind, payload);
        if let Some(trace_id) = trace_id {
            envelope = envelope.with_trace_id(trace_id);
        }

        // One envelope per call: retries resend the same idempotency key
        let document = serde_json::to_value(&envelope)?;
        let bytes = serde_json::to_vec(&document)?;

        let config = RetryConfig::default().with_max_attempts(max_retries);
        let connection = &self.connection;
        let result = retry_with_backoff(
            || {
                let bytes = bytes.clone();
                async move {
                    let bus = connection.current().await.ok_or(BusError::NotConnected)?;
                    bus.publish(topic, bytes).await
                }
            },
            &config,
            "tracker_publish",
        )
        .await;

        match result {
            Ok(()) => {
                self.metrics.publish_total.with_label_values(&["ok"]).inc();
                tracing::debug!(
                    topic = %topic,
                    kind = %kind,
                    trace_id = %envelope.trace_id,
                    "Event published"
                );
                Ok(envelope.trace_id)
            }
            Err(source) => {
                self.metrics
                    .publish_total
                    .with_label_values(&["exhausted"])
                    .inc();

                let reason = FailureReason::PublishExhausted {
                    attempts: config.max_attempts,
                    detail: source.to_string(),
                };
                self.router
                    .dead_letter(topic, DlqPayload::Structured(document), &reason)
                    .await;

                tracing::error!(
                    topic = %topic,
                    kind = %kind,
                    trace_id = %envelope.trace_id,
                    error = %source,
                    "Publish exhausted, envelope dead-lettered"
                );

                Err(PublishError::Exhausted {
                    topic: topic.to_string(),
                    attempts: config.max_attempts,
                    trace_id: envelope.trace_id,
                    source,
                })
            }
        }
    }
}
