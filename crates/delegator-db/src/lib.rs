//! Database layer: connection pooling, migrations, and typed queries over
//! the `tasks` and `orchestrations` tables.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;

pub use config::DbConfig;
pub use models::{
    ActivityLogEntry, Orchestration, OrchestrationStatus, OrchestrationStatusParseError, Task,
    TaskStatus, TaskStatusParseError, WorkerModel, WorkerModelParseError,
};
