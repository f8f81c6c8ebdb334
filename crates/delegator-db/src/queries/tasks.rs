//! Database query functions for the `tasks` table.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::PgPool;

use crate::models::{Task, TaskStatus, WorkerModel};

/// Fields required to insert a new task row.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub working_directory: String,
    pub system_prompt: String,
    pub execution_prompt: String,
    pub model: WorkerModel,
    pub orchestration_id: Option<i64>,
    pub identifier: Option<String>,
    pub depends_on: Option<JsonValue>,
    pub initial_delay: Option<f64>,
}

/// Insert a new task row (I8: the row is created before any execution is
/// attempted).
pub async fn insert_task(pool: &PgPool, new: &NewTask) -> Result<Task> {
    let task = sqlx::query_as::<_, Task>(
        "INSERT INTO tasks \
             (working_directory, system_prompt, execution_prompt, model, \
              orchestration_id, identifier, depends_on, initial_delay) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         RETURNING *",
    )
    .bind(&new.working_directory)
    .bind(&new.system_prompt)
    .bind(&new.execution_prompt)
    .bind(new.model)
    .bind(new.orchestration_id)
    .bind(&new.identifier)
    .bind(&new.depends_on)
    .bind(new.initial_delay)
    .fetch_one(pool)
    .await
    .context("failed to insert task")?;

    Ok(task)
}

/// Set the on-disk log path for a task that was just created.
///
/// Split from `insert_task` because the log file's name is derived from the
/// assigned task id, which only exists once the INSERT has run.
pub async fn set_log_file_path(pool: &PgPool, id: i64, log_file_path: &str) -> Result<Task> {
    let task = sqlx::query_as::<_, Task>(
        "UPDATE tasks SET log_file_path = $1 WHERE id = $2 RETURNING *",
    )
    .bind(log_file_path)
    .bind(id)
    .fetch_one(pool)
    .await
    .context("failed to set task log file path")?;

    Ok(task)
}

/// Fetch a single task by ID.
pub async fn get_task(pool: &PgPool, id: i64) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch task")?;

    Ok(task)
}

/// List all tasks, most recently created first.
pub async fn list_tasks(pool: &PgPool) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>("SELECT * FROM tasks ORDER BY created_at DESC")
        .fetch_all(pool)
        .await
        .context("failed to list tasks")?;

    Ok(tasks)
}

/// List all tasks belonging to an orchestration, in creation order.
pub async fn list_tasks_for_orchestration(
    pool: &PgPool,
    orchestration_id: i64,
) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks WHERE orchestration_id = $1 ORDER BY created_at ASC",
    )
    .bind(orchestration_id)
    .fetch_all(pool)
    .await
    .context("failed to list tasks for orchestration")?;

    Ok(tasks)
}

/// Atomically transition a task's status using optimistic locking: the
/// UPDATE only applies if the row's current status matches `from`. Returns
/// the number of rows affected (0 means a concurrent writer already moved
/// the row, or it no longer exists).
pub async fn transition_status(
    pool: &PgPool,
    id: i64,
    from: TaskStatus,
    to: TaskStatus,
) -> Result<u64> {
    // started_at is set only on the first PENDING/WAITING -> RUNNING
    // transition (crud.py's update_task_status behavior).
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = $1, \
             started_at = CASE WHEN $1 = 'running' THEN COALESCE(started_at, NOW()) ELSE started_at END \
         WHERE id = $2 AND status = $3",
    )
    .bind(to)
    .bind(id)
    .bind(from)
    .execute(pool)
    .await
    .context("failed to transition task status")?;

    Ok(result.rows_affected())
}

/// Record the PID of the worker process backing a RUNNING task.
pub async fn set_pid(pool: &PgPool, id: i64, pid: i32) -> Result<()> {
    sqlx::query("UPDATE tasks SET pid = $1 WHERE id = $2")
        .bind(pid)
        .bind(id)
        .execute(pool)
        .await
        .context("failed to set task pid")?;

    Ok(())
}

/// Append a line to the in-memory/db-mirrored `last_action_cache` (the
/// durable log file itself is written by the caller; this keeps the latest
/// line queryable without reading the file).
pub async fn update_last_action_cache(pool: &PgPool, id: i64, line: &str) -> Result<()> {
    sqlx::query("UPDATE tasks SET last_action_cache = $1 WHERE id = $2")
        .bind(line)
        .bind(id)
        .execute(pool)
        .await
        .context("failed to update task last_action_cache")?;

    Ok(())
}

/// Finalize a task with a terminal status, routing the message to
/// `final_summary` (COMPLETED) or `error_message` (FAILED) and stamping
/// `ended_at`.
pub async fn finalize(
    pool: &PgPool,
    id: i64,
    from: TaskStatus,
    to: TaskStatus,
    message: Option<&str>,
) -> Result<u64> {
    debug_assert!(to.is_terminal());

    let (final_summary, error_message) = match to {
        TaskStatus::Completed => (message, None),
        _ => (None, message),
    };

    let result = sqlx::query(
        "UPDATE tasks \
         SET status = $1, final_summary = $2, error_message = $3, ended_at = NOW() \
         WHERE id = $4 AND status = $5",
    )
    .bind(to)
    .bind(final_summary)
    .bind(error_message)
    .bind(id)
    .bind(from)
    .execute(pool)
    .await
    .context("failed to finalize task")?;

    Ok(result.rows_affected())
}

/// Mark a WAITING task as SKIPPED because an upstream dependency failed
/// (I3's cascade rule).
pub async fn mark_skipped(pool: &PgPool, id: i64, reason: &str) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'skipped', \
             error_message = $1, \
             dependency_failed_at = NOW(), \
             ended_at = NOW() \
         WHERE id = $2 AND status IN ('pending', 'waiting')",
    )
    .bind(reason)
    .bind(id)
    .execute(pool)
    .await
    .context("failed to mark task skipped")?;

    Ok(result.rows_affected())
}

/// Increment the retry attempt counter of a task that stays RUNNING
/// throughout a transient-failure retry. `started_at` is deliberately left
/// untouched: the executor's retry loop never leaves RUNNING, so the Task's
/// visible status and start time are stable across retries.
pub async fn increment_attempt_in_place(pool: &PgPool, id: i64, current_attempt: i32) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET attempt = attempt + 1 \
         WHERE id = $1 AND status = 'running' AND attempt = $2",
    )
    .bind(id)
    .bind(current_attempt)
    .execute(pool)
    .await
    .context("failed to increment task retry attempt")?;

    Ok(result.rows_affected())
}

/// Delete a task. Rejected by the caller (see `CoreError::NotTerminal`) when
/// the task is PENDING, WAITING, or RUNNING; this query enforces it again at
/// the storage layer as a second line of defense.
pub async fn delete_task(pool: &PgPool, id: i64) -> Result<u64> {
    let result = sqlx::query(
        "DELETE FROM tasks \
         WHERE id = $1 AND status IN ('completed', 'failed', 'skipped')",
    )
    .bind(id)
    .execute(pool)
    .await
    .context("failed to delete task")?;

    Ok(result.rows_affected())
}

/// Delete every task in a COMPLETED or FAILED terminal state. SKIPPED tasks
/// are intentionally retained (see DESIGN.md's Open Question decision).
pub async fn clear_terminal(pool: &PgPool) -> Result<u64> {
    let result = sqlx::query("DELETE FROM tasks WHERE status IN ('completed', 'failed')")
        .execute(pool)
        .await
        .context("failed to clear terminal tasks")?;

    Ok(result.rows_affected())
}

/// Tasks stuck in RUNNING since before `threshold`, for the contingency
/// sweep (mirrors `get_stuck_tasks`).
pub async fn get_stuck_tasks(pool: &PgPool, threshold: DateTime<Utc>) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks \
         WHERE status = 'running' AND started_at IS NOT NULL AND started_at < $1",
    )
    .bind(threshold)
    .fetch_all(pool)
    .await
    .context("failed to get stuck tasks")?;

    Ok(tasks)
}

/// RUNNING tasks left over from a previous process (restart recovery). The
/// orchestrator does not resurrect these; it is the contingency sweep's job
/// to eventually fail them.
pub async fn get_running_tasks(pool: &PgPool) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE status = 'running'")
        .fetch_all(pool)
        .await
        .context("failed to get running tasks")?;

    Ok(tasks)
}
