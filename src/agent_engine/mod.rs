pub mod control;
pub mod engine;
pub mod event_bus;
pub mod history;
pub mod loop_control;
pub mod state;

pub use engine::Orchestrator;
pub use event_bus::{EventBus, TaskEvent};
pub use state::{TaskOutcome, TaskReport, TaskStatus};
