//! The `WorkerAdapter` trait -- the capability interface over the external
//! AI-assistant SDK.
//!
//! The trait is intentionally object-safe so it can be stored as
//! `Arc<dyn WorkerAdapter>` and shared across concurrently-running
//! Executors.

use std::pin::Pin;

use async_trait::async_trait;
use delegator_db::models::WorkerModel;
use futures::Stream;

/// A single human-readable progress line emitted while a task runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressMessage(pub String);

/// The terminal outcome of a `WorkerAdapter::run` stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalResult {
    Ok(String),
    Err(AdapterError),
}

/// Failure taxonomy the adapter exposes upward (§4.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    /// Network glitch, rate limit -- the Executor may retry.
    Transient(String),
    /// Invalid prompt, auth failure -- the Executor must fail the task.
    Permanent(String),
    /// The adapter died without a terminal message. Treated as Permanent
    /// once the circuit-breaker budget for this adapter is exhausted.
    Crashed(String),
}

impl std::fmt::Display for AdapterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient(m) => write!(f, "transient: {m}"),
            Self::Permanent(m) => write!(f, "permanent: {m}"),
            Self::Crashed(m) => write!(f, "crashed: {m}"),
        }
    }
}

/// One item yielded by a running adapter: either more progress, or the
/// terminal outcome that ends the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    Progress(ProgressMessage),
    Terminal(TerminalResult),
}

/// Adapter interface for invoking the external AI-assistant SDK.
///
/// Must be invokable from the Executor's own task (not a subprocess)
/// because the backend carries authentication state only in the current
/// process -- a hard constraint inherited from the backend.
///
/// # Object Safety
///
/// Every method returns a concrete type or a boxed trait object, so
/// `Box<dyn WorkerAdapter>` / `Arc<dyn WorkerAdapter>` are usable.
#[async_trait]
pub trait WorkerAdapter: Send + Sync {
    /// Human-readable name for this adapter (used as the circuit breaker
    /// key).
    fn name(&self) -> &str;

    /// Run one task invocation, yielding progress lines and finally a
    /// sentinel [`RunEvent::Terminal`] carrying the outcome.
    fn run(
        &self,
        system_prompt: &str,
        execution_prompt: &str,
        working_directory: &str,
        model: WorkerModel,
    ) -> Pin<Box<dyn Stream<Item = RunEvent> + Send>>;
}

// Compile-time assertion: WorkerAdapter must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn WorkerAdapter) {}
};

/// A scripted [`WorkerAdapter`] test double: replays a fixed sequence of
/// progress lines followed by a fixed terminal result. Gated behind the
/// `test-util` feature (rather than plain `#[cfg(test)]`) so that
/// `delegator-server`'s router tests can depend on it too.
#[cfg(any(test, feature = "test-util"))]
pub struct NullWorkerAdapter {
    pub name: String,
    pub progress: Vec<String>,
    pub terminal: TerminalResult,
}

#[cfg(any(test, feature = "test-util"))]
impl NullWorkerAdapter {
    pub fn completing(name: impl Into<String>, progress: Vec<&str>, summary: &str) -> Self {
        Self {
            name: name.into(),
            progress: progress.into_iter().map(str::to_owned).collect(),
            terminal: TerminalResult::Ok(summary.to_owned()),
        }
    }

    pub fn failing(name: impl Into<String>, progress: Vec<&str>, error: AdapterError) -> Self {
        Self {
            name: name.into(),
            progress: progress.into_iter().map(str::to_owned).collect(),
            terminal: TerminalResult::Err(error),
        }
    }
}

#[cfg(any(test, feature = "test-util"))]
#[async_trait]
impl WorkerAdapter for NullWorkerAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(
        &self,
        _system_prompt: &str,
        _execution_prompt: &str,
        _working_directory: &str,
        _model: WorkerModel,
    ) -> Pin<Box<dyn Stream<Item = RunEvent> + Send>> {
        let mut events: Vec<RunEvent> = self
            .progress
            .iter()
            .cloned()
            .map(|line| RunEvent::Progress(ProgressMessage(line)))
            .collect();
        events.push(RunEvent::Terminal(self.terminal.clone()));
        Box::pin(futures::stream::iter(events))
    }
}
