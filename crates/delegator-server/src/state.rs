//! Shared application state threaded through every axum handler via
//! `State<AppState>`.

use std::sync::Arc;

use delegator_core::contingency::ContingencyManager;
use delegator_core::{Executor, Orchestrator, WorkerAdapter};
use sqlx::PgPool;

use crate::broadcaster::Broadcaster;
use crate::config::ServerConfig;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub broadcaster: Arc<Broadcaster>,
    pub adapter: Arc<dyn WorkerAdapter>,
    pub config: Arc<ServerConfig>,
    pub contingency: Arc<ContingencyManager>,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        broadcaster: Arc<Broadcaster>,
        adapter: Arc<dyn WorkerAdapter>,
        config: Arc<ServerConfig>,
        contingency: Arc<ContingencyManager>,
    ) -> Self {
        Self {
            pool,
            broadcaster,
            adapter,
            config,
            contingency,
        }
    }

    /// A freshly-built Executor bound to this state's pool, adapter, and
    /// notifier. Cheap: everything it holds is an `Arc` clone or a `PgPool`
    /// handle.
    pub fn executor(&self) -> Executor {
        Executor::new(
            self.pool.clone(),
            Arc::clone(&self.adapter),
            Arc::clone(&self.broadcaster) as Arc<dyn delegator_core::EventNotifier>,
            self.config.log_dir.clone(),
            self.config.circuit_breaker_dir.clone(),
        )
    }

    /// A freshly-built Orchestrator wrapping a fresh Executor, for driving
    /// one orchestration's waves.
    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(
            self.pool.clone(),
            Arc::new(self.executor()),
            Arc::clone(&self.broadcaster) as Arc<dyn delegator_core::EventNotifier>,
        )
    }
}
