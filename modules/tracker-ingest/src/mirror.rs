use std::sync::Arc;

use crate::store::{EventStore, StorageError};
use crate::validation::InboundEnvelope;

/// Sole writer of `events_mirror`
#[derive(Clone)]
pub struct MirrorWriter {
    store: Arc<dyn EventStore>,
}

impl MirrorWriter {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    /// Insert the full envelope document under the topic it arrived on
    pub async fn mirror(&self, topic: &str, envelope: &InboundEnvelope) -> Result<i64, StorageError> {
        let id = self.store.insert_mirror(topic, &envelope.document).await?;

        tracing::debug!(
            topic = %topic,
            trace_id = %envelope.trace_id,
            kind = %envelope.kind,
            mirror_id = id,
            "Event mirrored"
        );

        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryEventStore;
    use crate::validation::validate;

    #[tokio::test]
    async fn test_mirror_stores_document_verbatim() {
        let store = InMemoryEventStore::new();
        let writer = MirrorWriter::new(Arc::new(store.clone()));
        let raw = br#"{"trace_id":"t","ts":"2024-01-01T00:00:00Z","kind":"task.created","idempotency_key":"k","payload":{"task_id":"t1"}}"#;
        let envelope = validate(raw).unwrap();

        writer.mirror("tracker/events/tasks/created", &envelope).await.unwrap();

        let rows = store.mirror_records().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].payload, envelope.document);
    }

    #[tokio::test]
    async fn test_storage_errors_propagate() {
        let store = InMemoryEventStore::new();
        store.fail_mirror_writes(true);
        let writer = MirrorWriter::new(Arc::new(store));
        let envelope = validate(br#"{"trace_id":"t","ts":"x","kind":"k","idempotency_key":"i"}"#).unwrap();

        assert!(writer.mirror("tracker/commands/x", &envelope).await.is_err());
    }
}
