//! Fan-out of domain events to connected WebSocket clients (§4.7).
//!
//! `tokio::sync::broadcast` is the fan-out primitive: bounded, and a slow
//! subscriber lags and is dropped rather than ever blocking a publisher.

use delegator_core::{DomainEvent, EventNotifier};
use serde::Serialize;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 1024;

/// One event on the wire, carrying the originating id plus a small JSON
/// payload (§4.7's event kind list).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    #[serde(rename = "task_created")]
    TaskCreated { task_id: i64 },
    #[serde(rename = "task_started")]
    TaskStarted { task_id: i64 },
    #[serde(rename = "task_progress")]
    TaskProgress { task_id: i64, line: String },
    #[serde(rename = "task_completed")]
    TaskCompleted { task_id: i64 },
    #[serde(rename = "task_failed")]
    TaskFailed { task_id: i64 },
    #[serde(rename = "orchestration_started")]
    OrchestrationStarted { orchestration_id: i64 },
    #[serde(rename = "orchestration_completed")]
    OrchestrationCompleted { orchestration_id: i64 },
    #[serde(rename = "orchestration_failed")]
    OrchestrationFailed { orchestration_id: i64 },
    #[serde(rename = "heartbeat")]
    Heartbeat,
}

impl From<DomainEvent> for Option<Event> {
    fn from(event: DomainEvent) -> Self {
        use delegator_db::models::{OrchestrationStatus, TaskStatus};

        Some(match event {
            DomainEvent::TaskCreated { task_id } => Event::TaskCreated { task_id },
            DomainEvent::TaskProgress { task_id, line } => Event::TaskProgress { task_id, line },
            DomainEvent::TaskStatusChanged { task_id, status } => match status {
                TaskStatus::Running => Event::TaskStarted { task_id },
                TaskStatus::Completed => Event::TaskCompleted { task_id },
                TaskStatus::Failed | TaskStatus::Skipped => Event::TaskFailed { task_id },
                TaskStatus::Pending | TaskStatus::Waiting => return None,
            },
            DomainEvent::OrchestrationCreated { .. } => return None,
            DomainEvent::OrchestrationStatusChanged {
                orchestration_id,
                status,
            } => match status {
                OrchestrationStatus::Running => Event::OrchestrationStarted { orchestration_id },
                OrchestrationStatus::Completed => Event::OrchestrationCompleted { orchestration_id },
                OrchestrationStatus::Failed | OrchestrationStatus::Cancelled => {
                    Event::OrchestrationFailed { orchestration_id }
                }
                OrchestrationStatus::Pending => return None,
            },
        })
    }
}

/// Shared registry of subscribers. Publish is non-blocking: with no
/// subscribers, `send` simply returns an error that's ignored here.
pub struct Broadcaster {
    tx: broadcast::Sender<Event>,
}

impl Broadcaster {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl EventNotifier for Broadcaster {
    fn notify(&self, event: DomainEvent) {
        if let Some(wire_event) = Option::<Event>::from(event) {
            self.publish(wire_event);
        }
    }
}
