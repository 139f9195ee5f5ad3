//! Persistence seam for the mirror and DLQ tables

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::PgPool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

pub use crate::repos::dlq_repo::DlqRecord;
pub use crate::repos::mirror_repo::MirrorRecord;
use crate::repos::{dlq_repo, mirror_repo};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Append-only writes for the two tables the pipeline owns
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert one mirror row, returning its id
    async fn insert_mirror(&self, topic: &str, payload: &Value) -> Result<i64, StorageError>;

    /// Insert one DLQ row, returning its id
    async fn insert_dlq(
        &self,
        original_topic: &str,
        failure_reason: &str,
        payload: &Value,
    ) -> Result<i64, StorageError>;
}

/// Postgres-backed store; each call borrows a pooled connection for one statement
#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn insert_mirror(&self, topic: &str, payload: &Value) -> Result<i64, StorageError> {
        Ok(mirror_repo::insert(&self.pool, topic, payload).await?)
    }

    async fn insert_dlq(
        &self,
        original_topic: &str,
        failure_reason: &str,
        payload: &Value,
    ) -> Result<i64, StorageError> {
        Ok(dlq_repo::insert(&self.pool, original_topic, failure_reason, payload).await?)
    }
}

/// In-process store for tests and `STORE_TYPE=inmemory`
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    mirror: Mutex<Vec<MirrorRecord>>,
    dlq: Mutex<Vec<DlqRecord>>,
    fail_mirror: AtomicBool,
    fail_dlq: AtomicBool,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_mirror_writes(&self, fail: bool) {
        self.inner.fail_mirror.store(fail, Ordering::SeqCst);
    }

    pub fn fail_dlq_writes(&self, fail: bool) {
        self.inner.fail_dlq.store(fail, Ordering::SeqCst);
    }

    pub async fn mirror_records(&self) -> Vec<MirrorRecord> {
        self.inner.mirror.lock().await.clone()
    }

    pub async fn dlq_records(&self) -> Vec<DlqRecord> {
        self.inner.dlq.lock().await.clone()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn insert_mirror(&self, topic: &str, payload: &Value) -> Result<i64, StorageError> {
        if self.inner.fail_mirror.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(
                "mirror table rejected the insert".to_string(),
            ));
        }

        let mut rows = self.inner.mirror.lock().await;
        let id = rows.len() as i64 + 1;
        rows.push(MirrorRecord {
            id,
            topic: topic.to_string(),
            payload: payload.clone(),
            created_at: Utc::now(),
            // Same text Postgres gives for payload->>'trace_id'
            trace_id: payload.get("trace_id").and_then(|v| match v {
                Value::Null => None,
                Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            }),
        });
        Ok(id)
    }

    async fn insert_dlq(
        &self,
        original_topic: &str,
        failure_reason: &str,
        payload: &Value,
    ) -> Result<i64, StorageError> {
        if self.inner.fail_dlq.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(
                "dlq table rejected the insert".to_string(),
            ));
        }

        let mut rows = self.inner.dlq.lock().await;
        let id = rows.len() as i64 + 1;
        rows.push(DlqRecord {
            id,
            original_topic: original_topic.to_string(),
            failure_reason: failure_reason.to_string(),
            payload: payload.clone(),
            created_at: Utc::now(),
        });
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_inmemory_mirror_extracts_trace_id() {
        let store = InMemoryEventStore::new();
        let started = Utc::now();

        let id = store
            .insert_mirror("tracker/events/projects/created", &json!({"trace_id": "t-1"}))
            .await
            .unwrap();
        store
            .insert_mirror("tracker/metrics/cpu", &json!({"trace_id": 5}))
            .await
            .unwrap();
        store
            .insert_mirror("tracker/metrics/cpu", &json!({"trace_id": null}))
            .await
            .unwrap();

        let rows = store.mirror_records().await;
        assert_eq!(id, 1);
        assert_eq!(rows[0].trace_id.as_deref(), Some("t-1"));
        assert!(rows[0].created_at >= started);
        // Non-string ids render as their JSON text, like payload->>'trace_id'
        assert_eq!(rows[1].trace_id.as_deref(), Some("5"));
        assert_eq!(rows[2].trace_id, None);
    }

    #[tokio::test]
    async fn test_injected_failures_leave_tables_untouched() {
        let store = InMemoryEventStore::new();
        store.fail_mirror_writes(true);
        store.fail_dlq_writes(true);

        assert!(matches!(
            store.insert_mirror("t", &json!({})).await,
            Err(StorageError::Unavailable(_))
        ));
        assert!(store.insert_dlq("t", "r", &json!({})).await.is_err());
        assert!(store.mirror_records().await.is_empty());
        assert!(store.dlq_records().await.is_empty());

        store.fail_dlq_writes(false);
        assert_eq!(store.insert_dlq("t", "r", &json!({})).await.unwrap(), 1);
    }
}
