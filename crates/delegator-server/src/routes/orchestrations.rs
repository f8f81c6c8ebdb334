//! `/api/v1/orchestrations*` handlers (§6).

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use delegator_core::{CoreError, EntityKind, TaskCreate, TaskSpec};
use delegator_db::models::{Orchestration, WorkerModel};
use delegator_db::queries::{orchestrations as orch_db, tasks as task_db};
use serde::{Deserialize, Serialize};

use crate::broadcaster::Event;
use crate::error::AppError;
use crate::routes::record_activity;
use crate::routes::tasks::TaskRead;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/orchestrations", post(create_orchestration).get(list_orchestrations))
        .route("/orchestrations/{id}", get(get_orchestration))
        .route("/orchestrations/{id}/cancel", post(cancel_orchestration))
}

#[derive(Debug, Deserialize)]
pub struct CreateOrchestrationTask {
    pub working_directory: String,
    pub system_prompt: Option<String>,
    pub execution_prompt: String,
    pub model: Option<WorkerModel>,
    pub identifier: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub initial_delay: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrchestrationRequest {
    pub tasks: Vec<CreateOrchestrationTask>,
}

#[derive(Debug, Serialize)]
pub struct OrchestrationRead {
    pub id: i64,
    pub status: String,
    pub total_tasks: i32,
    pub completed_tasks: i32,
    pub failed_tasks: i32,
    pub skipped_tasks: i32,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
    pub tasks: Vec<TaskRead>,
}

impl OrchestrationRead {
    fn new(orchestration: Orchestration, tasks: Vec<TaskRead>) -> Self {
        Self {
            id: orchestration.id,
            status: orchestration.status.to_string(),
            total_tasks: orchestration.total_tasks,
            completed_tasks: orchestration.completed_tasks,
            failed_tasks: orchestration.failed_tasks,
            skipped_tasks: orchestration.skipped_tasks,
            created_at: orchestration.created_at,
            started_at: orchestration.started_at,
            ended_at: orchestration.ended_at,
            tasks,
        }
    }
}

async fn create_orchestration(
    State(state): State<AppState>,
    Json(body): Json<CreateOrchestrationRequest>,
) -> Result<Json<OrchestrationRead>, AppError> {
    if body.tasks.is_empty() {
        return Err(CoreError::ValidationFailure("tasks must not be empty".into()).into());
    }

    let mut specs = Vec::with_capacity(body.tasks.len());
    for task in body.tasks {
        let identifier = task.identifier.clone();
        let spec = TaskSpec::from_task_create(TaskCreate {
            working_directory: task.working_directory,
            system_prompt: task.system_prompt,
            execution_prompt: task.execution_prompt,
            model: task.model,
            identifier: Some(identifier),
            depends_on: task.depends_on,
            initial_delay: task.initial_delay,
        })?;
        specs.push(spec);
    }

    let orchestration = orch_db::insert_orchestration(&state.pool, specs.len() as i32)
        .await
        .map_err(CoreError::store_unavailable)?;

    let mut inserted = Vec::with_capacity(specs.len());
    for spec in specs {
        let new_task = task_db::NewTask {
            working_directory: spec.working_directory,
            system_prompt: spec.system_prompt,
            execution_prompt: spec.execution_prompt,
            model: spec.model,
            orchestration_id: Some(orchestration.id),
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
        let task = crate::routes::tasks::set_log_file_path(&state, task).await?;
        inserted.push(task);
    }

    // Validate the DAG synchronously so a cycle or bad dependency surfaces
    // as a 400 from this request rather than failing the orchestration
    // asynchronously after the caller has already moved on.
    if let Err(err) = delegator_core::validate_and_order(&inserted) {
        let _ = orch_db::transition_status(
            &state.pool,
            orchestration.id,
            delegator_db::models::OrchestrationStatus::Pending,
            delegator_db::models::OrchestrationStatus::Failed,
        )
        .await;
        return Err(err.into());
    }

    record_activity(&state.pool, "orchestration_created", None, Some(orchestration.id)).await;
    state.broadcaster.publish(Event::OrchestrationStarted {
        orchestration_id: orchestration.id,
    });

    let orchestrator = state.orchestrator();
    let orchestration_id = orchestration.id;
    tokio::spawn(async move {
        let _ = orchestrator.run(orchestration_id).await;
    });

    let task_reads = inserted.into_iter().map(TaskRead::from).collect();
    Ok(Json(OrchestrationRead::new(orchestration, task_reads)))
}

async fn get_orchestration(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<OrchestrationRead>, AppError> {
    let orchestration = orch_db::get_orchestration(&state.pool, id)
        .await
        .map_err(CoreError::store_unavailable)?
        .ok_or(CoreError::NotFound(EntityKind::Orchestration, id))?;
    let tasks = task_db::list_tasks_for_orchestration(&state.pool, id)
        .await
        .map_err(CoreError::store_unavailable)?
        .into_iter()
        .map(TaskRead::from)
        .collect();
    Ok(Json(OrchestrationRead::new(orchestration, tasks)))
}

async fn list_orchestrations(
    State(state): State<AppState>,
) -> Result<Json<Vec<OrchestrationRead>>, AppError> {
    let orchestrations = orch_db::list_orchestrations(&state.pool)
        .await
        .map_err(CoreError::store_unavailable)?;

    let mut reads = Vec::with_capacity(orchestrations.len());
    for orchestration in orchestrations {
        let tasks = task_db::list_tasks_for_orchestration(&state.pool, orchestration.id)
            .await
            .map_err(CoreError::store_unavailable)?
            .into_iter()
            .map(TaskRead::from)
            .collect();
        reads.push(OrchestrationRead::new(orchestration, tasks));
    }
    Ok(Json(reads))
}

#[derive(Debug, Serialize)]
pub struct CancelOrchestrationResponse {
    pub id: i64,
    pub status: String,
}

async fn cancel_orchestration(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<CancelOrchestrationResponse>, AppError> {
    let orchestrator = state.orchestrator();
    let orchestration = orchestrator.cancel(id).await?;
    record_activity(&state.pool, "orchestration_cancelled", None, Some(id)).await;
    state.broadcaster.publish(Event::OrchestrationFailed {
        orchestration_id: id,
    });
    Ok(Json(CancelOrchestrationResponse {
        id: orchestration.id,
        status: orchestration.status.to_string(),
    }))
}
