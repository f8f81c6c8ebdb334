//! ContingencyManager: the background maintenance loop that fails
//! stuck/orphaned RUNNING tasks, snapshots the database, and reports health
//! (ContingencyManager/ActivityLog supplement, §2's component 8).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use delegator_db::models::TaskStatus;
use delegator_db::queries::tasks;
use sqlx::PgPool;
use tokio::process::Command;
use tracing::{error, info, warn};

use crate::activity_log;
use crate::circuit_breaker;
use crate::config::ContingencyConfig;
use crate::notifier::{DomainEvent, EventNotifier};

/// A snapshot of system health, served by `GET /health`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthReport {
    pub running_tasks: usize,
    pub stuck_tasks_failed_last_sweep: usize,
    pub orphaned_tasks_failed_last_sweep: usize,
    pub last_sweep_at: Option<chrono::DateTime<Utc>>,
}

pub struct ContingencyManager {
    pool: PgPool,
    notifier: Arc<dyn EventNotifier>,
    config: ContingencyConfig,
    backup_dir: PathBuf,
    circuit_breaker_dir: PathBuf,
    database_url: String,
    last_sweep: tokio::sync::Mutex<Option<HealthReport>>,
}

impl ContingencyManager {
    pub fn new(
        pool: PgPool,
        notifier: Arc<dyn EventNotifier>,
        backup_dir: impl Into<PathBuf>,
        circuit_breaker_dir: impl Into<PathBuf>,
        database_url: impl Into<String>,
    ) -> Self {
        Self {
            pool,
            notifier,
            config: ContingencyConfig::default(),
            backup_dir: backup_dir.into(),
            circuit_breaker_dir: circuit_breaker_dir.into(),
            database_url: database_url.into(),
            last_sweep: tokio::sync::Mutex::new(None),
        }
    }

    pub fn with_config(mut self, config: ContingencyConfig) -> Self {
        self.config = config;
        self
    }

    /// Run the sweep loop forever, waking every `config.interval`. Intended
    /// to be spawned as its own task; a failed iteration is logged and the
    /// loop continues rather than exiting the process.
    pub async fn run_forever(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        loop {
            ticker.tick().await;
            if let Err(err) = self.sweep_once().await {
                error!(%err, "contingency sweep iteration failed");
            }
        }
    }

    /// One sweep iteration: snapshot, fail stuck/orphaned tasks, prune old
    /// circuit-breaker state, and refresh the health report.
    pub async fn sweep_once(&self) -> anyhow::Result<()> {
        if let Err(err) = snapshot_database(&self.database_url, &self.backup_dir).await {
            warn!(%err, "contingency snapshot failed, continuing with the sweep");
        }
        prune_old_backups(&self.backup_dir, ContingencyConfig::BACKUP_RETENTION_COUNT).await?;

        let now = Utc::now();
        let stuck_threshold = now - chrono::Duration::from_std(self.config.max_task_age())?;
        let orphan_threshold =
            now - chrono::Duration::from_std(ContingencyConfig::ORPHAN_GRACE_PERIOD)?;

        let stuck = tasks::get_stuck_tasks(&self.pool, stuck_threshold).await?;
        let mut stuck_failed = 0usize;
        for task in &stuck {
            self.fail_task(task.id, "exceeded timeout").await;
            stuck_failed += 1;
        }

        let running = tasks::get_running_tasks(&self.pool).await?;
        let mut orphaned_failed = 0usize;
        for task in &running {
            if stuck.iter().any(|s| s.id == task.id) {
                continue;
            }
            let started_before_grace = task
                .started_at
                .map(|started_at| started_at < orphan_threshold)
                .unwrap_or(false);
            if task.pid.is_none() && started_before_grace {
                self.fail_task(task.id, "exceeded timeout").await;
                orphaned_failed += 1;
            }
        }

        let pruned = circuit_breaker::prune_stale(
            &self.circuit_breaker_dir,
            chrono::Duration::days(ContingencyConfig::CIRCUIT_BREAKER_STATE_MAX_AGE_DAYS),
        )
        .unwrap_or(0);
        if pruned > 0 {
            info!(pruned, "pruned stale circuit breaker state files");
        }

        let running_count = tasks::get_running_tasks(&self.pool).await?.len();
        let report = HealthReport {
            running_tasks: running_count,
            stuck_tasks_failed_last_sweep: stuck_failed,
            orphaned_tasks_failed_last_sweep: orphaned_failed,
            last_sweep_at: Some(now),
        };
        *self.last_sweep.lock().await = Some(report);

        Ok(())
    }

    async fn fail_task(&self, task_id: i64, reason: &str) {
        match tasks::finalize(&self.pool, task_id, TaskStatus::Running, TaskStatus::Failed, Some(reason)).await {
            Ok(affected) if affected > 0 => {
                activity_log::record(
                    &self.pool,
                    "task_failed",
                    Some(task_id),
                    None,
                    Some(serde_json::json!({"reason": reason})),
                )
                .await;
                self.notifier.notify(DomainEvent::TaskStatusChanged {
                    task_id,
                    status: TaskStatus::Failed,
                });
            }
            Ok(_) => {}
            Err(err) => error!(task_id, %err, "contingency sweep failed to finalize stuck task"),
        }
    }

    /// The most recent sweep's health report, or an empty one if no sweep
    /// has run yet.
    pub async fn health(&self) -> HealthReport {
        self.last_sweep
            .lock()
            .await
            .clone()
            .unwrap_or(HealthReport {
                running_tasks: 0,
                stuck_tasks_failed_last_sweep: 0,
                orphaned_tasks_failed_last_sweep: 0,
                last_sweep_at: None,
            })
    }
}

/// Snapshot the database to `backup_dir/tasks_<timestamp>.sql` via
/// `pg_dump`. Errors are returned to the caller, which treats a failed
/// snapshot as non-fatal to the rest of the sweep.
async fn snapshot_database(database_url: &str, backup_dir: &Path) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(backup_dir).await?;
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let path = backup_dir.join(format!("tasks_{timestamp}.sql"));

    let output = Command::new("pg_dump")
        .arg(database_url)
        .arg("--file")
        .arg(&path)
        .output()
        .await?;

    if !output.status.success() {
        anyhow::bail!(
            "pg_dump exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(())
}

/// Keep only the `retain` most recent backup files.
async fn prune_old_backups(backup_dir: &Path, retain: usize) -> anyhow::Result<()> {
    if !backup_dir.exists() {
        return Ok(());
    }
    let mut entries = Vec::new();
    let mut read_dir = tokio::fs::read_dir(backup_dir).await?;
    while let Some(entry) = read_dir.next_entry().await? {
        let metadata = entry.metadata().await?;
        if metadata.is_file() {
            entries.push((entry.path(), metadata.modified()?));
        }
    }
    entries.sort_by_key(|(_, modified)| std::cmp::Reverse(*modified));

    for (path, _) in entries.into_iter().skip(retain) {
        let _ = tokio::fs::remove_file(path).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn prune_old_backups_keeps_only_retain_count() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5 {
            tokio::fs::write(dir.path().join(format!("tasks_{i}.sql")), b"x")
                .await
                .unwrap();
        }

        prune_old_backups(dir.path(), 3).await.unwrap();

        let remaining = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(remaining, 3);
    }

    #[tokio::test]
    async fn prune_old_backups_is_noop_on_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        prune_old_backups(&missing, 3).await.unwrap();
    }
}
