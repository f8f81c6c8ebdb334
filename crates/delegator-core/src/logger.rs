//! Per-task append-only progress log (§4.2's Logger component).
//!
//! Distinct from [`crate::activity_log`], which records domain events across
//! all tasks; this one is a plain text file per task, named by
//! `Task::log_file_path`, used so operators can `tail -f` a single task.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Fallback log file path for a task under `log_dir`, used only when a
/// task's `log_file_path` column hasn't been populated (rows inserted
/// directly rather than through the create-task route).
pub fn log_file_path(log_dir: &Path, task_id: i64) -> PathBuf {
    log_dir.join(format!("task-{task_id}.log"))
}

/// Build the log file path persisted to a task's `log_file_path` column at
/// creation time: `summary_<id>_<sanitized working directory>_<timestamp>.log`.
pub fn build_log_file_path(
    log_dir: &Path,
    task_id: i64,
    working_directory: &str,
    created_at: DateTime<Utc>,
) -> PathBuf {
    let sanitized = sanitize_working_directory(working_directory);
    let timestamp = created_at.format("%Y%m%d%H%M%S");
    log_dir.join(format!("summary_{task_id}_{sanitized}_{timestamp}.log"))
}

/// Replace everything but ASCII alphanumerics with `_` and trim the result,
/// so a working directory like `/home/user/my-repo` becomes `home_user_my_repo`.
fn sanitize_working_directory(working_directory: &str) -> String {
    let cleaned: String = working_directory
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let trimmed = cleaned.trim_matches('_');
    if trimmed.is_empty() {
        "root".to_owned()
    } else {
        trimmed.to_owned()
    }
}

/// Append one line to a task's log file, creating the file and its parent
/// directory if needed.
///
/// A write failure here must never fail the task it's logging for, so
/// failures are swallowed after being logged at `warn` level -- the
/// in-memory `last_action_cache` column is the source of truth for the most
/// recent progress line if the file write is lost.
pub async fn append(path: &Path, line: &str) {
    if let Err(err) = append_inner(path, line).await {
        warn!(?path, %err, "failed to append to task log file");
    }
}

async fn append_inner(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    if !line.ends_with('\n') {
        file.write_all(b"\n").await?;
    }
    file.flush().await
}
