//! `/api/v1/tasks*` handlers (§6).

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use delegator_core::{CoreError, EntityKind, TaskCreate, TaskSpec};
use delegator_db::models::{Task, WorkerModel};
use delegator_db::queries::tasks as task_db;
use serde::{Deserialize, Serialize};

use crate::broadcaster::Event;
use crate::error::AppError;
use crate::routes::record_activity;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/tasks", post(create_task).get(list_tasks))
        .route("/tasks/clear", post(clear_tasks))
        .route("/tasks/{id}", get(get_task).delete(delete_task))
}

/// The human-facing request body for `POST /tasks` (§6).
#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub working_directory: String,
    pub system_prompt: Option<String>,
    pub execution_prompt: String,
    pub model: Option<WorkerModel>,
    pub identifier: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub initial_delay: Option<f64>,
}

/// The `TaskRead` wire shape (§6).
#[derive(Debug, Serialize)]
pub struct TaskRead {
    pub id: i64,
    pub status: String,
    pub working_directory: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_action_cache: Option<String>,
    pub final_summary: Option<String>,
    pub error_message: Option<String>,
    pub orchestration_id: Option<i64>,
    pub identifier: Option<String>,
    pub depends_on: Vec<String>,
    pub initial_delay: Option<f64>,
}

impl From<Task> for TaskRead {
    fn from(task: Task) -> Self {
        let depends_on = task.depends_on_identifiers();
        Self {
            id: task.id,
            status: task.status.to_string(),
            working_directory: task.working_directory,
            created_at: task.created_at,
            started_at: task.started_at,
            ended_at: task.ended_at,
            last_action_cache: task.last_action_cache,
            final_summary: task.final_summary,
            error_message: task.error_message,
            orchestration_id: task.orchestration_id,
            identifier: task.identifier,
            depends_on,
            initial_delay: task.initial_delay,
        }
    }
}

/// Compute and persist the log file path for a just-inserted task. Split
/// from the INSERT because the path is derived from the assigned task id.
pub(crate) async fn set_log_file_path(state: &AppState, task: Task) -> Result<Task, AppError> {
    let log_path = delegator_core::logger::build_log_file_path(
        &state.config.log_dir,
        task.id,
        &task.working_directory,
        task.created_at,
    );
    let task = task_db::set_log_file_path(&state.pool, task.id, &log_path.to_string_lossy())
        .await
        .map_err(CoreError::store_unavailable)?;
    Ok(task)
}

async fn create_task(
    State(state): State<AppState>,
    Json(body): Json<CreateTaskRequest>,
) -> Result<Json<TaskRead>, AppError> {
    let spec = TaskSpec::from_task_create(TaskCreate {
        working_directory: body.working_directory,
        system_prompt: body.system_prompt,
        execution_prompt: body.execution_prompt,
        model: body.model,
        identifier: body.identifier,
        depends_on: body.depends_on,
        initial_delay: body.initial_delay,
    })?;

    let new_task = task_db::NewTask {
        working_directory: spec.working_directory,
        system_prompt: spec.system_prompt,
        execution_prompt: spec.execution_prompt,
        model: spec.model,
        orchestration_id: None,
        identifier: spec.identifier,
        depends_on: if spec.depends_on.is_empty() {
            None
        } else {
            Some(serde_json::json!(spec.depends_on))
        },
        initial_delay: spec.initial_delay,
    };

    let task = task_db::insert_task(&state.pool, &new_task)
        .await
        .map_err(CoreError::store_unavailable)?;
    let task = set_log_file_path(&state, task).await?;

    record_activity(&state.pool, "task_created", Some(task.id), None).await;
    state.broadcaster.publish(Event::TaskCreated { task_id: task.id });

    // A standalone task (no orchestration_id) starts immediately: claim it
    // into RUNNING synchronously so the response reflects the real status,
    // then let the Executor drive it to completion as a background activity.
    let executor = state.executor();
    let claimed = executor.claim(task).await?;
    let response = TaskRead::from(claimed.clone());
    tokio::spawn(async move { executor.run(claimed).await });

    Ok(Json(response))
}

async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<TaskRead>, AppError> {
    let task = task_db::get_task(&state.pool, id)
        .await
        .map_err(CoreError::store_unavailable)?
        .ok_or(CoreError::NotFound(EntityKind::Task, id))?;
    Ok(Json(TaskRead::from(task)))
}

async fn list_tasks(State(state): State<AppState>) -> Result<Json<Vec<TaskRead>>, AppError> {
    let tasks = task_db::list_tasks(&state.pool)
        .await
        .map_err(CoreError::store_unavailable)?;
    Ok(Json(tasks.into_iter().map(TaskRead::from).collect()))
}

#[derive(Debug, Serialize)]
pub struct DeleteTaskResponse {
    pub success: bool,
    pub message: String,
}

async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<DeleteTaskResponse>, AppError> {
    // Distinguish "not found" from "found but not terminal" so the client
    // gets the right status code.
    let existing = task_db::get_task(&state.pool, id)
        .await
        .map_err(CoreError::store_unavailable)?
        .ok_or(CoreError::NotFound(EntityKind::Task, id))?;

    let affected = task_db::delete_task(&state.pool, id)
        .await
        .map_err(CoreError::store_unavailable)?;
    if affected == 0 {
        return Err(CoreError::NotTerminal(EntityKind::Task, existing.id).into());
    }
    Ok(Json(DeleteTaskResponse {
        success: true,
        message: format!("task {id} deleted"),
    }))
}

#[derive(Debug, Serialize)]
pub struct ClearTasksResponse {
    pub deleted: u64,
    pub message: String,
}

async fn clear_tasks(State(state): State<AppState>) -> Result<Json<ClearTasksResponse>, AppError> {
    let deleted = task_db::clear_terminal(&state.pool)
        .await
        .map_err(CoreError::store_unavailable)?;
    Ok(Json(ClearTasksResponse {
        deleted,
        message: format!("{deleted} task(s) cleared"),
    }))
}
