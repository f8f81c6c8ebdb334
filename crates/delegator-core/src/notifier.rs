//! The seam between the Executor/Orchestrator and the Broadcaster.
//!
//! `delegator-core` has no notion of WebSockets; it only knows it must tell
//! *someone* when something happened. `delegator-server`'s Broadcaster
//! implements this trait and fans events out over `tokio::sync::broadcast`.

use delegator_db::models::{OrchestrationStatus, TaskStatus};

/// A domain event worth telling subscribers about.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    TaskCreated {
        task_id: i64,
    },
    TaskStatusChanged {
        task_id: i64,
        status: TaskStatus,
    },
    TaskProgress {
        task_id: i64,
        line: String,
    },
    OrchestrationCreated {
        orchestration_id: i64,
    },
    OrchestrationStatusChanged {
        orchestration_id: i64,
        status: OrchestrationStatus,
    },
}

/// Receives domain events as they happen. Implementations must be
/// best-effort and non-blocking -- a slow or absent subscriber must never
/// hold up the Executor or Orchestrator.
pub trait EventNotifier: Send + Sync {
    fn notify(&self, event: DomainEvent);
}

/// A notifier that discards every event, for contexts (tests, one-off
/// scripts) that don't need a Broadcaster.
pub struct NullNotifier;

impl EventNotifier for NullNotifier {
    fn notify(&self, _event: DomainEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_notifier_accepts_any_event() {
        let notifier = NullNotifier;
        notifier.notify(DomainEvent::TaskCreated { task_id: 1 });
    }
}
