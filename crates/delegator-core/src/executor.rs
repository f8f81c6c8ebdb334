//! The Executor (T): drives one Task through claim → run → finalize, owning
//! retry/backoff and the circuit breaker around its [`WorkerAdapter`].

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use delegator_db::models::{Task, TaskStatus};
use delegator_db::queries::tasks;
use futures::{FutureExt, StreamExt};
use sqlx::PgPool;
use tracing::{error, info, warn};

use crate::activity_log;
use crate::circuit_breaker::CircuitBreaker;
use crate::config::ExecutorConfig;
use crate::error::{CoreError, EntityKind};
use crate::logger;
use crate::notifier::{DomainEvent, EventNotifier};
use crate::worker_adapter::{AdapterError, RunEvent, TerminalResult, WorkerAdapter};

/// Everything one Executor run needs, bundled so the call sites in
/// [`crate::orchestrator`] stay short.
pub struct Executor {
    pool: PgPool,
    adapter: Arc<dyn WorkerAdapter>,
    notifier: Arc<dyn EventNotifier>,
    config: ExecutorConfig,
    log_dir: std::path::PathBuf,
    circuit_breaker_dir: std::path::PathBuf,
}

impl Executor {
    pub fn new(
        pool: PgPool,
        adapter: Arc<dyn WorkerAdapter>,
        notifier: Arc<dyn EventNotifier>,
        log_dir: impl Into<std::path::PathBuf>,
        circuit_breaker_dir: impl Into<std::path::PathBuf>,
    ) -> Self {
        Self {
            pool,
            adapter,
            notifier,
            config: ExecutorConfig::default(),
            log_dir: log_dir.into(),
            circuit_breaker_dir: circuit_breaker_dir.into(),
        }
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    fn breaker(&self) -> CircuitBreaker {
        CircuitBreaker::new(&self.circuit_breaker_dir, self.adapter.name())
    }

    /// Drive `task` (already claimed into RUNNING by [`claim`]) to a
    /// terminal status.
    ///
    /// Any panic escaping the worker-adapter stream is caught so a single
    /// misbehaving adapter cannot take the whole process down; the task is
    /// instead finalized FAILED with an "executor crashed" message.
    pub async fn run(&self, task: Task) {
        let task_id = task.id;
        let result = AssertUnwindSafe(self.run_inner(&task)).catch_unwind().await;

        if let Err(panic) = result {
            let detail = panic_message(&panic);
            error!(task_id, %detail, "executor crashed while running task");
            if let Err(err) = tasks::finalize(
                &self.pool,
                task_id,
                TaskStatus::Running,
                TaskStatus::Failed,
                Some(&format!("executor crashed: {detail}")),
            )
            .await
            {
                error!(task_id, %err, "failed to finalize task after executor crash");
            }
            activity_log::record(
                &self.pool,
                "task_failed",
                Some(task_id),
                task.orchestration_id,
                Some(serde_json::json!({"reason": "executor_crash"})),
            )
            .await;
            self.notifier.notify(DomainEvent::TaskStatusChanged {
                task_id,
                status: TaskStatus::Failed,
            });
        }
    }

    async fn run_inner(&self, task: &Task) {
        let breaker = self.breaker();
        match breaker.allow_request() {
            Ok(true) => {}
            Ok(false) => {
                self.finalize_failed(task, "circuit breaker open for this worker adapter")
                    .await;
                return;
            }
            Err(err) => {
                warn!(task_id = task.id, %err, "failed to read circuit breaker state, allowing request");
            }
        }

        let log_path = match &task.log_file_path {
            Some(path) => std::path::PathBuf::from(path),
            None => logger::log_file_path(&self.log_dir, task.id),
        };
        let mut stream = self.adapter.run(
            &task.system_prompt,
            &task.execution_prompt,
            &task.working_directory,
            task.model,
        );

        let mut terminal: Option<TerminalResult> = None;
        while let Some(event) = stream.next().await {
            match event {
                RunEvent::Progress(line) => {
                    logger::append(&log_path, &line.0).await;
                    if let Err(err) = tasks::update_last_action_cache(&self.pool, task.id, &line.0).await
                    {
                        warn!(task_id = task.id, %err, "failed to update last_action_cache");
                    }
                    self.notifier.notify(DomainEvent::TaskProgress {
                        task_id: task.id,
                        line: line.0,
                    });
                }
                RunEvent::Terminal(outcome) => {
                    terminal = Some(outcome);
                    break;
                }
            }
        }

        match terminal {
            Some(TerminalResult::Ok(summary)) => {
                let _ = breaker.record_success();
                self.finalize_completed(task, &summary).await;
            }
            Some(TerminalResult::Err(AdapterError::Transient(detail))) => {
                let _ = breaker.record_failure();
                self.handle_transient(task, &detail).await;
            }
            Some(TerminalResult::Err(AdapterError::Permanent(detail))) => {
                let _ = breaker.record_failure();
                self.finalize_failed(task, &detail).await;
            }
            Some(TerminalResult::Err(AdapterError::Crashed(detail))) => {
                let _ = breaker.record_failure();
                self.finalize_failed(task, &format!("worker adapter crashed: {detail}"))
                    .await;
            }
            None => {
                let _ = breaker.record_failure();
                self.finalize_failed(task, "worker adapter stream ended without a terminal result")
                    .await;
            }
        }
    }

    /// A Transient failure is retried (without resetting `started_at`) if
    /// the attempt budget hasn't been spent; otherwise it's terminal.
    async fn handle_transient(&self, task: &Task, detail: &str) {
        if task.attempt + 1 >= self.config.max_attempts as i32 {
            self.finalize_failed(task, detail).await;
            return;
        }

        let delay = jittered(self.config.backoff_for(task.attempt as u32));
        info!(task_id = task.id, attempt = task.attempt, ?delay, "retrying after transient failure");
        tokio::time::sleep(delay).await;

        match tasks::increment_attempt_in_place(&self.pool, task.id, task.attempt).await {
            Ok(affected) if affected > 0 => {
                // Task never left RUNNING, so started_at is untouched (I2);
                // re-fetch just to pick up the bumped attempt counter.
                match tasks::get_task(&self.pool, task.id).await {
                    Ok(Some(refreshed)) => Box::pin(self.run_inner(&refreshed)).await,
                    Ok(None) => self.finalize_failed(task, detail).await,
                    Err(err) => {
                        error!(task_id = task.id, %err, "failed to refetch task for retry");
                        self.finalize_failed(task, detail).await;
                    }
                }
            }
            Ok(_) => {
                warn!(task_id = task.id, "attempt counter changed concurrently, finalizing failed");
                self.finalize_failed(task, detail).await;
            }
            Err(err) => {
                error!(task_id = task.id, %err, "failed to increment retry attempt");
                self.finalize_failed(task, detail).await;
            }
        }
    }

    async fn finalize_completed(&self, task: &Task, summary: &str) {
        debug_assert!(crate::state::is_valid_transition(
            TaskStatus::Running,
            TaskStatus::Completed
        ));
        if let Err(err) = tasks::finalize(
            &self.pool,
            task.id,
            TaskStatus::Running,
            TaskStatus::Completed,
            Some(summary),
        )
        .await
        {
            error!(task_id = task.id, %err, "failed to finalize completed task");
        }
        activity_log::record(
            &self.pool,
            "task_completed",
            Some(task.id),
            task.orchestration_id,
            None,
        )
        .await;
        self.notifier.notify(DomainEvent::TaskStatusChanged {
            task_id: task.id,
            status: TaskStatus::Completed,
        });
    }

    async fn finalize_failed(&self, task: &Task, detail: &str) {
        debug_assert!(crate::state::is_valid_transition(
            TaskStatus::Running,
            TaskStatus::Failed
        ));
        if let Err(err) = tasks::finalize(
            &self.pool,
            task.id,
            TaskStatus::Running,
            TaskStatus::Failed,
            Some(detail),
        )
        .await
        {
            error!(task_id = task.id, %err, "failed to finalize failed task");
        }
        activity_log::record(
            &self.pool,
            "task_failed",
            Some(task.id),
            task.orchestration_id,
            Some(serde_json::json!({"error": detail})),
        )
        .await;
        self.notifier.notify(DomainEvent::TaskStatusChanged {
            task_id: task.id,
            status: TaskStatus::Failed,
        });
    }

    /// Claim a PENDING or WAITING task into RUNNING via optimistic lock,
    /// returning the refreshed row on success.
    pub async fn claim(&self, task: Task) -> Result<Task, CoreError> {
        let from = task.status;
        if !crate::state::is_valid_transition(from, TaskStatus::Running) {
            return Err(CoreError::NotTerminal(EntityKind::Task, task.id));
        }
        let affected = tasks::transition_status(&self.pool, task.id, from, TaskStatus::Running)
            .await
            .map_err(CoreError::store_unavailable)?;
        if affected == 0 {
            return Err(CoreError::NotTerminal(EntityKind::Task, task.id));
        }
        let refreshed = tasks::get_task(&self.pool, task.id)
            .await
            .map_err(CoreError::store_unavailable)?
            .ok_or(CoreError::NotFound(EntityKind::Task, task.id))?;
        self.notifier.notify(DomainEvent::TaskStatusChanged {
            task_id: task.id,
            status: TaskStatus::Running,
        });
        Ok(refreshed)
    }
}

/// Full jitter (AWS-style): uniformly random between zero and the computed
/// backoff, so retrying siblings don't all wake up in lockstep.
fn jittered(backoff: std::time::Duration) -> std::time::Duration {
    use rand::Rng;
    if backoff.is_zero() {
        return backoff;
    }
    rand::rng().random_range(std::time::Duration::ZERO..=backoff)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}
