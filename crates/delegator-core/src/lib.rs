//! Core domain logic: the Executor, Orchestrator, circuit breaker, and the
//! typed error/config surface they share.

pub mod activity_log;
pub mod circuit_breaker;
pub mod claude_adapter;
pub mod config;
pub mod contingency;
pub mod error;
pub mod executor;
pub mod logger;
pub mod notifier;
pub mod orchestrator;
pub mod state;
pub mod validation;
pub mod worker_adapter;

pub use claude_adapter::ClaudeApiWorkerAdapter;
pub use config::{CircuitBreakerConfig, ContingencyConfig, ExecutorConfig};
pub use error::{CoreError, EntityKind};
pub use executor::Executor;
pub use notifier::{DomainEvent, EventNotifier, NullNotifier};
pub use orchestrator::{Orchestrator, validate_and_order};
pub use validation::{MCPCreateTaskPayload, TaskCreate, TaskSpec};
pub use worker_adapter::{AdapterError, ProgressMessage, RunEvent, TerminalResult, WorkerAdapter};
