//! Queries for the append-only `activity_log` table.

use sqlx::PgPool;

use crate::models::ActivityLogEntry;

/// Append one domain event. Failures here are reported by the caller but
/// never roll back the state change they're describing.
pub async fn record(
    pool: &PgPool,
    event_type: &str,
    task_id: Option<i64>,
    orchestration_id: Option<i64>,
    detail: Option<serde_json::Value>,
) -> Result<ActivityLogEntry, sqlx::Error> {
    sqlx::query_as::<_, ActivityLogEntry>(
        r#"
        INSERT INTO activity_log (event_type, task_id, orchestration_id, detail)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(event_type)
    .bind(task_id)
    .bind(orchestration_id)
    .bind(detail)
    .fetch_one(pool)
    .await
}

/// Most recent entries, newest first, for the health endpoint and future
/// audit surfaces.
pub async fn recent(pool: &PgPool, limit: i64) -> Result<Vec<ActivityLogEntry>, sqlx::Error> {
    sqlx::query_as::<_, ActivityLogEntry>(
        r#"
        SELECT * FROM activity_log
        ORDER BY created_at DESC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// All entries for one task, oldest first.
pub async fn for_task(pool: &PgPool, task_id: i64) -> Result<Vec<ActivityLogEntry>, sqlx::Error> {
    sqlx::query_as::<_, ActivityLogEntry>(
        r#"
        SELECT * FROM activity_log
        WHERE task_id = $1
        ORDER BY created_at ASC
        "#,
    )
    .bind(task_id)
    .fetch_all(pool)
    .await
}
