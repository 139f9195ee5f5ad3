//! Per-message handling: validate, optionally schema-check, mirror or dead-letter

use event_bus::BusMessage;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::Instant;
use tracing::Instrument;

use crate::dlq::{DeadLetterRouter, DlqPayload};
use crate::metrics::IngestMetrics;
use crate::mirror::MirrorWriter;
use crate::schema_registry::SchemaRegistry;
use crate::validation::{validate, FailureReason};

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Mirrored { id: i64 },
    DeadLettered { reason: FailureReason },
}

#[derive(Clone)]
pub struct MessageProcessor {
    mirror: MirrorWriter,
    router: DeadLetterRouter,
    schemas: Option<SchemaRegistry>,
    metrics: IngestMetrics,
}

impl MessageProcessor {
    pub fn new(
        mirror: MirrorWriter,
        router: DeadLetterRouter,
        schemas: Option<SchemaRegistry>,
        metrics: IngestMetrics,
    ) -> Self {
        Self {
            mirror,
            router,
            schemas,
            metrics,
        }
    }

    /// Handle one inbound message; never fails and never panics outward
    pub async fn handle(&self, msg: &BusMessage) -> ProcessOutcome {
        let span = tracing::info_span!(
            "mqtt.process_message",
            topic = %msg.subject,
            qos = msg.qos,
            payload_size = msg.payload.len(),
            trace_id = tracing::field::Empty,
            kind = tracing::field::Empty,
        );

        async {
            match AssertUnwindSafe(self.process(msg)).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(panic) => {
                    let detail = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    tracing::error!(topic = %msg.subject, panic = %detail, "Message handler panicked");

                    let reason = FailureReason::Processing(format!("handler panicked: {}", detail));
                    self.router
                        .dead_letter(&msg.subject, DlqPayload::Raw(msg.payload.clone()), &reason)
                        .await;
                    ProcessOutcome::DeadLettered { reason }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn process(&self, msg: &BusMessage) -> ProcessOutcome {
        let started = Instant::now();

        let envelope = match validate(&msg.payload) {
            Ok(envelope) => envelope,
            Err(reason) => {
                self.router
                    .dead_letter(&msg.subject, DlqPayload::Raw(msg.payload.clone()), &reason)
                    .await;
                return ProcessOutcome::DeadLettered { reason };
            }
        };

        let span = tracing::Span::current();
        span.record("trace_id", envelope.trace_id.as_str());
        span.record("kind", envelope.kind.as_str());

        if let Some(schemas) = &self.schemas {
            if let Err(reason) = schemas.check(&envelope) {
                self.router
                    .dead_letter(
                        &msg.subject,
                        DlqPayload::Structured(envelope.document.clone()),
                        &reason,
                    )
                    .await;
                return ProcessOutcome::DeadLettered { reason };
            }
        }

        match self.mirror.mirror(&msg.subject, &envelope).await {
            Ok(id) => {
                self.metrics
                    .ingest_total
                    .with_label_values(&[msg.subject.as_str(), envelope.kind.as_str()])
                    .inc();
                self.metrics
                    .event_latency_seconds
                    .observe(started.elapsed().as_secs_f64());
                ProcessOutcome::Mirrored { id }
            }
            Err(e) => {
                tracing::error!(topic = %msg.subject, error = %e, "Mirror insert failed");
                let reason = FailureReason::Processing(e.to_string());
                self.router
                    .dead_letter(
                        &msg.subject,
                        DlqPayload::Structured(envelope.document),
                        &reason,
                    )
                    .await;
                ProcessOutcome::DeadLettered { reason }
            }
        }
    }
}
