//! Thin wrapper over [`delegator_db::queries::activity_log`] that the
//! Executor and Orchestrator call into to record domain events, without
//! ever letting a logging failure fail the state change it's describing
//! (ContingencyManager/ActivityLog supplement, §2's component 9).

use delegator_db::queries::activity_log as db;
use sqlx::PgPool;
use tracing::warn;

/// Record one domain event. Errors are logged and swallowed: the caller's
/// state transition has already committed by the time this runs.
pub async fn record(
    pool: &PgPool,
    event_type: &str,
    task_id: Option<i64>,
    orchestration_id: Option<i64>,
    detail: Option<serde_json::Value>,
) {
    if let Err(err) = db::record(pool, event_type, task_id, orchestration_id, detail).await {
        warn!(%event_type, ?task_id, ?orchestration_id, %err, "failed to record activity log entry");
    }
}
