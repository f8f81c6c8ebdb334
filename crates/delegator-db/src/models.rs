use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Lifecycle status of a [`Task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Waiting,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl TaskStatus {
    /// Whether this status is terminal (I1: a Task never leaves a terminal
    /// state).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Waiting => "waiting",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = TaskStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "waiting" => Ok(Self::Waiting),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            other => Err(TaskStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskStatus`] string.
#[derive(Debug, Clone)]
pub struct TaskStatusParseError(pub String);

impl fmt::Display for TaskStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task status: {:?}", self.0)
    }
}

impl std::error::Error for TaskStatusParseError {}

// ---------------------------------------------------------------------------

/// Lifecycle status of an [`Orchestration`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl OrchestrationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for OrchestrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for OrchestrationStatus {
    type Err = OrchestrationStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(OrchestrationStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`OrchestrationStatus`] string.
#[derive(Debug, Clone)]
pub struct OrchestrationStatusParseError(pub String);

impl fmt::Display for OrchestrationStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid orchestration status: {:?}", self.0)
    }
}

impl std::error::Error for OrchestrationStatusParseError {}

// ---------------------------------------------------------------------------

/// Worker model selection for a task's execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WorkerModel {
    Haiku,
    #[default]
    Sonnet,
    Opus,
}

impl fmt::Display for WorkerModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Haiku => "haiku",
            Self::Sonnet => "sonnet",
            Self::Opus => "opus",
        };
        f.write_str(s)
    }
}

impl FromStr for WorkerModel {
    type Err = WorkerModelParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "haiku" => Ok(Self::Haiku),
            "sonnet" => Ok(Self::Sonnet),
            "opus" => Ok(Self::Opus),
            other => Err(WorkerModelParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`WorkerModel`] string.
#[derive(Debug, Clone)]
pub struct WorkerModelParseError(pub String);

impl fmt::Display for WorkerModelParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid worker model: {:?}", self.0)
    }
}

impl std::error::Error for WorkerModelParseError {}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A single unit of AI-assistant work (§3).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: i64,
    pub status: TaskStatus,
    pub pid: Option<i32>,
    pub working_directory: String,
    pub system_prompt: String,
    pub execution_prompt: String,
    pub model: WorkerModel,
    pub log_file_path: Option<String>,
    pub last_action_cache: Option<String>,
    pub final_summary: Option<String>,
    pub error_message: Option<String>,
    pub attempt: i32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub orchestration_id: Option<i64>,
    pub identifier: Option<String>,
    /// Stored as a JSON array of sibling identifiers (I6).
    pub depends_on: Option<serde_json::Value>,
    pub initial_delay: Option<f64>,
    pub dependency_failed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Parse `depends_on` into a list of sibling identifiers. An absent or
    /// malformed column is treated as "no dependencies".
    pub fn depends_on_identifiers(&self) -> Vec<String> {
        self.depends_on
            .as_ref()
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_owned))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// A DAG of Tasks executed together (§3).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Orchestration {
    pub id: i64,
    pub status: OrchestrationStatus,
    pub total_tasks: i32,
    pub completed_tasks: i32,
    pub failed_tasks: i32,
    pub skipped_tasks: i32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// One append-only domain event (ContingencyManager/ActivityLog supplement,
/// §2's component 9). Distinct from a task's own progress log file.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ActivityLogEntry {
    pub id: i64,
    /// e.g. "task_created", "task_completed", "orchestration_started".
    pub event_type: String,
    pub task_id: Option<i64>,
    pub orchestration_id: Option<i64>,
    pub detail: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
