use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::PgPool;

/// One row of `dlq_events`
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DlqRecord {
    pub id: i64,
    pub original_topic: String,
    pub failure_reason: String,
    pub payload: JsonValue,
    pub created_at: DateTime<Utc>,
}

/// Insert a failed event into the dead letter table
pub async fn insert(
    pool: &PgPool,
    original_topic: &str,
    failure_reason: &str,
    payload: &JsonValue,
) -> Result<i64, sqlx::Error> {
    let id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO dlq_events (original_topic, failure_reason, payload, created_at)
        VALUES ($1, $2, $3, $4)
        RETURNING id
        "#,
    )
    .bind(original_topic)
    .bind(failure_reason)
    .bind(payload)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;

    Ok(id)
}

pub async fn list_by_topic(
    pool: &PgPool,
    original_topic: &str,
) -> Result<Vec<DlqRecord>, sqlx::Error> {
    sqlx::query_as::<_, DlqRecord>(
        r#"
        SELECT id, original_topic, failure_reason, payload, created_at
        FROM dlq_events
        WHERE original_topic = $1
        ORDER BY id
        "#,
    )
    .bind(original_topic)
    .fetch_all(pool)
    .await
}
