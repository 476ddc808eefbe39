use serde::Serialize;
use tokio::sync::broadcast;

use crate::agent_engine::state::{StepResult, TaskReport, TaskStatus};
use crate::perception::types::DeviceInfo;

const EVENT_CAPACITY: usize = 256;

/// Observable progress of tasks, consumed by presentation layers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TaskEvent {
    Started { task_id: String, goal: String, device: DeviceInfo },
    Log { task_id: String, message: String },
    Screenshot { task_id: String, iteration: u32, data: String },
    StepFinished { task_id: String, result: StepResult },
    StatusChanged { task_id: String, status: TaskStatus },
    /// Final report, whatever the outcome.
    Finished { report: TaskReport },
    /// The task could not start.
    Failed { task_id: String, error: String },
}

impl TaskEvent {
    pub fn task_id(&self) -> &str {
        match self {
            Self::Started { task_id, .. }
            | Self::Log { task_id, .. }
            | Self::Screenshot { task_id, .. }
            | Self::StepFinished { task_id, .. }
            | Self::StatusChanged { task_id, .. }
            | Self::Failed { task_id, .. } => task_id,
            Self::Finished { report } => &report.task_id,
        }
    }
}

/// Event sink handed to an orchestrator at construction.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TaskEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.tx.subscribe()
    }

    /// Publishing with no subscriber is not an error.
    pub fn emit(&self, event: TaskEvent) {
        let _ = self.tx.send(event);
    }

    pub fn log(&self, task_id: &str, message: impl Into<String>) {
        self.emit(TaskEvent::Log { task_id: task_id.to_string(), message: message.into() });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
