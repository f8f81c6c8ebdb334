//! Database query functions for the `orchestrations` table.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::{Orchestration, OrchestrationStatus};

/// Insert a new orchestration row with the given total task count.
pub async fn insert_orchestration(pool: &PgPool, total_tasks: i32) -> Result<Orchestration> {
    let orchestration = sqlx::query_as::<_, Orchestration>(
        "INSERT INTO orchestrations (total_tasks) VALUES ($1) RETURNING *",
    )
    .bind(total_tasks)
    .fetch_one(pool)
    .await
    .context("failed to insert orchestration")?;

    Ok(orchestration)
}

/// Fetch a single orchestration by ID.
pub async fn get_orchestration(pool: &PgPool, id: i64) -> Result<Option<Orchestration>> {
    let orchestration =
        sqlx::query_as::<_, Orchestration>("SELECT * FROM orchestrations WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .context("failed to fetch orchestration")?;

    Ok(orchestration)
}

/// List all orchestrations, most recently created first.
pub async fn list_orchestrations(pool: &PgPool) -> Result<Vec<Orchestration>> {
    let orchestrations = sqlx::query_as::<_, Orchestration>(
        "SELECT * FROM orchestrations ORDER BY created_at DESC",
    )
    .fetch_all(pool)
    .await
    .context("failed to list orchestrations")?;

    Ok(orchestrations)
}

/// Atomically transition an orchestration's status using optimistic locking.
pub async fn transition_status(
    pool: &PgPool,
    id: i64,
    from: OrchestrationStatus,
    to: OrchestrationStatus,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE orchestrations \
         SET status = $1, \
             started_at = CASE WHEN $1 = 'running' THEN COALESCE(started_at, NOW()) ELSE started_at END, \
             ended_at = CASE WHEN $1 IN ('completed', 'failed', 'cancelled') THEN NOW() ELSE ended_at END \
         WHERE id = $2 AND status = $3",
    )
    .bind(to)
    .bind(id)
    .bind(from)
    .execute(pool)
    .await
    .context("failed to transition orchestration status")?;

    Ok(result.rows_affected())
}

/// Recompute and persist an orchestration's task-count aggregates from the
/// current state of its tasks (I4: aggregate status is derived, never
/// independently mutated).
pub async fn refresh_counts(pool: &PgPool, id: i64) -> Result<Orchestration> {
    let orchestration = sqlx::query_as::<_, Orchestration>(
        "UPDATE orchestrations SET \
             completed_tasks = (SELECT COUNT(*) FROM tasks WHERE orchestration_id = $1 AND status = 'completed'), \
             failed_tasks = (SELECT COUNT(*) FROM tasks WHERE orchestration_id = $1 AND status = 'failed'), \
             skipped_tasks = (SELECT COUNT(*) FROM tasks WHERE orchestration_id = $1 AND status = 'skipped') \
         WHERE id = $1 \
         RETURNING *",
    )
    .bind(id)
    .fetch_one(pool)
    .await
    .context("failed to refresh orchestration counts")?;

    Ok(orchestration)
}
