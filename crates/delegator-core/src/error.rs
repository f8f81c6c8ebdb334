//! The typed error taxonomy shared by the Executor, Orchestrator, and the
//! HTTP boundary.

use thiserror::Error;

/// Which kind of row a [`CoreError::NotFound`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Task,
    Orchestration,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Task => "task",
            Self::Orchestration => "orchestration",
        };
        f.write_str(s)
    }
}

/// Internal error taxonomy. Not tied to any particular transport; the HTTP
/// layer (`delegator-server::error::AppError`) maps each variant to a status
/// code.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation failed: {0}")]
    ValidationFailure(String),

    #[error("{0} {1} not found")]
    NotFound(EntityKind, i64),

    #[error("cannot act on {0} {1}: not in a terminal state")]
    NotTerminal(EntityKind, i64),

    #[error("dependency cycle detected among: {}", .0.join(", "))]
    CycleDetected(Vec<String>),

    #[error("identifier {0:?} in depends_on does not refer to a sibling task")]
    InvalidDependency(String),

    #[error("identifier {0:?} is used by more than one task in this orchestration")]
    DuplicateIdentifier(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("worker adapter transient failure: {0}")]
    AdapterTransient(String),

    #[error("worker adapter permanent failure: {0}")]
    AdapterPermanent(String),

    #[error("executor crashed: {0}")]
    ExecutorCrash(String),

    #[error("orchestrator crashed: {0}")]
    OrchestratorCrash(String),
}

impl CoreError {
    /// Wrap any lower-level error as a [`CoreError::StoreUnavailable`].
    ///
    /// Used at the boundary between `anyhow`-propagating plumbing (Store
    /// queries) and the typed taxonomy the API and Orchestrator match on.
    pub fn store_unavailable(err: impl std::fmt::Display) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}
