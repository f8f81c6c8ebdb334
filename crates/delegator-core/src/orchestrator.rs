//! The Orchestrator (O): validates a Task DAG, then releases it wave by
//! wave, propagating SKIPs on dependency failure.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use delegator_db::models::{Orchestration, OrchestrationStatus, Task, TaskStatus};
use delegator_db::queries::{orchestrations, tasks};
use sqlx::PgPool;
use tracing::{error, info, warn};

use crate::activity_log;
use crate::error::{CoreError, EntityKind};
use crate::executor::Executor;
use crate::notifier::{DomainEvent, EventNotifier};

/// Validate the DAG formed by `siblings`' `depends_on` fields.
///
/// Returns the topological wave assignment (wave index -> task ids) on
/// success. On failure, returns the specific [`CoreError`] the caller should
/// surface (V1/V2/V3 from the orchestrator's validation pass).
pub fn validate_and_order(siblings: &[Task]) -> Result<Vec<Vec<i64>>, CoreError> {
    // V1: unique identifiers.
    let mut by_identifier: HashMap<&str, i64> = HashMap::new();
    for task in siblings {
        let Some(identifier) = task.identifier.as_deref() else {
            continue;
        };
        if by_identifier.insert(identifier, task.id).is_some() {
            return Err(CoreError::DuplicateIdentifier(identifier.to_owned()));
        }
    }

    // V2: every depends_on identifier refers to a sibling.
    for task in siblings {
        for dep in task.depends_on_identifiers() {
            if !by_identifier.contains_key(dep.as_str()) {
                return Err(CoreError::InvalidDependency(dep));
            }
        }
    }

    // V3: topological sort via Kahn's algorithm; leftover nodes => a cycle.
    let mut indegree: HashMap<i64, usize> = siblings.iter().map(|t| (t.id, 0)).collect();
    let mut dependents: HashMap<i64, Vec<i64>> = HashMap::new();
    for task in siblings {
        for dep in task.depends_on_identifiers() {
            let dep_id = by_identifier[dep.as_str()];
            *indegree.get_mut(&task.id).unwrap() += 1;
            dependents.entry(dep_id).or_default().push(task.id);
        }
    }

    let mut waves = Vec::new();
    let mut frontier: VecDeque<i64> = indegree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&id, _)| id)
        .collect();
    let mut remaining = indegree.clone();
    let mut visited = 0usize;

    while !frontier.is_empty() {
        let wave: Vec<i64> = frontier.drain(..).collect();
        visited += wave.len();
        let mut next_frontier = Vec::new();
        for &id in &wave {
            if let Some(children) = dependents.get(&id) {
                for &child in children {
                    let entry = remaining.get_mut(&child).unwrap();
                    *entry -= 1;
                    if *entry == 0 {
                        next_frontier.push(child);
                    }
                }
            }
        }
        waves.push(wave);
        frontier = next_frontier.into();
    }

    if visited != siblings.len() {
        let cyclic: Vec<String> = siblings
            .iter()
            .filter(|t| remaining.get(&t.id).copied().unwrap_or(0) > 0)
            .filter_map(|t| t.identifier.clone())
            .collect();
        return Err(CoreError::CycleDetected(cyclic));
    }

    Ok(waves)
}

/// Drives one Orchestration through its waves.
pub struct Orchestrator {
    pool: PgPool,
    executor: Arc<Executor>,
    notifier: Arc<dyn EventNotifier>,
}

impl Orchestrator {
    pub fn new(pool: PgPool, executor: Arc<Executor>, notifier: Arc<dyn EventNotifier>) -> Self {
        Self {
            pool,
            executor,
            notifier,
        }
    }

    /// Run one orchestration from PENDING to a terminal status.
    pub async fn run(&self, orchestration_id: i64) -> Result<(), CoreError> {
        let siblings = tasks::list_tasks_for_orchestration(&self.pool, orchestration_id)
            .await
            .map_err(CoreError::store_unavailable)?;

        let waves = match validate_and_order(&siblings) {
            Ok(waves) => waves,
            Err(err) => {
                self.fail_orchestration(orchestration_id, &err.to_string())
                    .await?;
                return Err(err);
            }
        };

        orchestrations::transition_status(
            &self.pool,
            orchestration_id,
            OrchestrationStatus::Pending,
            OrchestrationStatus::Running,
        )
        .await
        .map_err(CoreError::store_unavailable)?;
        activity_log::record(
            &self.pool,
            "orchestration_started",
            None,
            Some(orchestration_id),
            None,
        )
        .await;
        self.notifier
            .notify(DomainEvent::OrchestrationStatusChanged {
                orchestration_id,
                status: OrchestrationStatus::Running,
            });

        let by_id: HashMap<i64, Task> = siblings.into_iter().map(|t| (t.id, t)).collect();
        let mut failed_ids: HashSet<i64> = HashSet::new();

        for wave in waves {
            let mut handles = Vec::new();
            for task_id in wave {
                let Some(task) = by_id.get(&task_id) else {
                    continue;
                };

                // A sibling may have been SKIPPED by cascade propagation
                // from an earlier wave's failure; don't run it.
                let current = tasks::get_task(&self.pool, task_id)
                    .await
                    .map_err(CoreError::store_unavailable)?
                    .ok_or(CoreError::NotFound(EntityKind::Task, task_id))?;
                if current.status.is_terminal() {
                    continue;
                }

                let delay = task.initial_delay.filter(|d| *d > 0.0);
                let executor = Arc::clone(&self.executor);
                handles.push(tokio::spawn(async move {
                    if let Some(delay_secs) = delay {
                        tokio::time::sleep(std::time::Duration::from_secs_f64(delay_secs)).await;
                    }
                    let claimed = executor.claim(current).await?;
                    executor.run(claimed).await;
                    Ok::<(), CoreError>(())
                }));
            }

            for handle in handles {
                match handle.await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        warn!(%err, "failed to claim task for a wave, leaving it for the contingency sweep");
                    }
                    Err(err) => {
                        error!(%err, "executor task panicked outside its own catch_unwind");
                    }
                }
            }

            // Discover failures in this wave and cascade-skip their
            // transitive successors before the next wave is considered.
            let wave_tasks = tasks::list_tasks_for_orchestration(&self.pool, orchestration_id)
                .await
                .map_err(CoreError::store_unavailable)?;
            for task in &wave_tasks {
                if task.status == TaskStatus::Failed {
                    failed_ids.insert(task.id);
                }
            }
            if !failed_ids.is_empty() {
                self.cascade_skip(orchestration_id, &wave_tasks, &failed_ids)
                    .await?;
            }

            orchestrations::refresh_counts(&self.pool, orchestration_id)
                .await
                .map_err(CoreError::store_unavailable)?;
        }

        self.finalize_orchestration(orchestration_id).await
    }

    /// Transition every WAITING descendant of a failed task to SKIPPED.
    async fn cascade_skip(
        &self,
        orchestration_id: i64,
        siblings: &[Task],
        failed_ids: &HashSet<i64>,
    ) -> Result<(), CoreError> {
        let by_identifier: HashMap<&str, i64> = siblings
            .iter()
            .filter_map(|t| t.identifier.as_deref().map(|ident| (ident, t.id)))
            .collect();

        let mut to_skip: HashSet<i64> = HashSet::new();
        let mut frontier: Vec<i64> = failed_ids.iter().copied().collect();

        while let Some(id) = frontier.pop() {
            for task in siblings {
                if task.status != TaskStatus::Waiting || to_skip.contains(&task.id) {
                    continue;
                }
                let depends_on_failed = task
                    .depends_on_identifiers()
                    .iter()
                    .filter_map(|ident| by_identifier.get(ident.as_str()))
                    .any(|&dep_id| dep_id == id || to_skip.contains(&dep_id));
                if depends_on_failed {
                    to_skip.insert(task.id);
                    frontier.push(task.id);
                }
            }
        }

        for task_id in to_skip {
            debug_assert!(crate::state::is_valid_transition(
                TaskStatus::Waiting,
                TaskStatus::Skipped
            ));
            tasks::mark_skipped(&self.pool, task_id, "Skipped due to dependency failure")
                .await
                .map_err(CoreError::store_unavailable)?;
            activity_log::record(
                &self.pool,
                "task_skipped",
                Some(task_id),
                Some(orchestration_id),
                None,
            )
            .await;
            self.notifier.notify(DomainEvent::TaskStatusChanged {
                task_id,
                status: TaskStatus::Skipped,
            });
        }

        Ok(())
    }

    async fn finalize_orchestration(&self, orchestration_id: i64) -> Result<(), CoreError> {
        let refreshed = orchestrations::refresh_counts(&self.pool, orchestration_id)
            .await
            .map_err(CoreError::store_unavailable)?;

        let to_status = if refreshed.failed_tasks + refreshed.skipped_tasks == 0 {
            OrchestrationStatus::Completed
        } else {
            OrchestrationStatus::Failed
        };

        orchestrations::transition_status(
            &self.pool,
            orchestration_id,
            OrchestrationStatus::Running,
            to_status,
        )
        .await
        .map_err(CoreError::store_unavailable)?;

        let event_type = match to_status {
            OrchestrationStatus::Completed => "orchestration_completed",
            _ => "orchestration_failed",
        };
        activity_log::record(&self.pool, event_type, None, Some(orchestration_id), None).await;
        self.notifier
            .notify(DomainEvent::OrchestrationStatusChanged {
                orchestration_id,
                status: to_status,
            });
        info!(orchestration_id, ?to_status, "orchestration finished");

        Ok(())
    }

    async fn fail_orchestration(&self, orchestration_id: i64, detail: &str) -> Result<(), CoreError> {
        orchestrations::transition_status(
            &self.pool,
            orchestration_id,
            OrchestrationStatus::Pending,
            OrchestrationStatus::Failed,
        )
        .await
        .map_err(CoreError::store_unavailable)?;
        activity_log::record(
            &self.pool,
            "orchestration_failed",
            None,
            Some(orchestration_id),
            Some(serde_json::json!({"error": detail})),
        )
        .await;
        self.notifier
            .notify(DomainEvent::OrchestrationStatusChanged {
                orchestration_id,
                status: OrchestrationStatus::Failed,
            });
        Ok(())
    }

    /// Cancel a running orchestration: skip every non-terminal task and
    /// transition the orchestration to CANCELLED.
    pub async fn cancel(&self, orchestration_id: i64) -> Result<Orchestration, CoreError> {
        let siblings = tasks::list_tasks_for_orchestration(&self.pool, orchestration_id)
            .await
            .map_err(CoreError::store_unavailable)?;

        for task in &siblings {
            if matches!(task.status, TaskStatus::Pending | TaskStatus::Waiting) {
                tasks::mark_skipped(&self.pool, task.id, "Skipped due to orchestration cancellation")
                    .await
                    .map_err(CoreError::store_unavailable)?;
                self.notifier.notify(DomainEvent::TaskStatusChanged {
                    task_id: task.id,
                    status: TaskStatus::Skipped,
                });
            }
        }

        orchestrations::transition_status(
            &self.pool,
            orchestration_id,
            OrchestrationStatus::Running,
            OrchestrationStatus::Cancelled,
        )
        .await
        .map_err(CoreError::store_unavailable)?;
        orchestrations::refresh_counts(&self.pool, orchestration_id)
            .await
            .map_err(CoreError::store_unavailable)?;

        let orchestration = orchestrations::get_orchestration(&self.pool, orchestration_id)
            .await
            .map_err(CoreError::store_unavailable)?
            .ok_or(CoreError::NotFound(EntityKind::Orchestration, orchestration_id))?;

        activity_log::record(
            &self.pool,
            "orchestration_cancelled",
            None,
            Some(orchestration_id),
            None,
        )
        .await;
        self.notifier
            .notify(DomainEvent::OrchestrationStatusChanged {
                orchestration_id,
                status: OrchestrationStatus::Cancelled,
            });

        Ok(orchestration)
    }
}
