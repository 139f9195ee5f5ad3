use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::PgPool;

/// One row of `events_mirror`
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MirrorRecord {
    pub id: i64,
    pub topic: String,
    pub payload: JsonValue,
    pub created_at: DateTime<Utc>,
    pub trace_id: Option<String>,
}

/// Append one envelope to the mirror table
pub async fn insert(pool: &PgPool, topic: &str, payload: &JsonValue) -> Result<i64, sqlx::Error> {
    let id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO events_mirror (topic, payload, created_at)
        VALUES ($1, $2, $3)
        RETURNING id
        "#,
    )
    .bind(topic)
    .bind(payload)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;

    Ok(id)
}

/// Mirrored events for a topic, oldest first
pub async fn list_by_topic(pool: &PgPool, topic: &str) -> Result<Vec<MirrorRecord>, sqlx::Error> {
    sqlx::query_as::<_, MirrorRecord>(
        r#"
        SELECT id, topic, payload, created_at, trace_id
        FROM events_mirror
        WHERE topic = $1
        ORDER BY id
        "#,
    )
    .bind(topic)
    .fetch_all(pool)
    .await
}

/// Mirrored events carrying a trace id (served by the generated column index)
pub async fn find_by_trace_id(
    pool: &PgPool,
    trace_id: &str,
) -> Result<Vec<MirrorRecord>, sqlx::Error> {
    sqlx::query_as::<_, MirrorRecord>(
        r#"
        SELECT id, topic, payload, created_at, trace_id
        FROM events_mirror
        WHERE trace_id = $1
        ORDER BY id
        "#,
    )
    .bind(trace_id)
    .fetch_all(pool)
    .await
}
