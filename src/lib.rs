//! Goal-driven Android automation: observe the device over ADB, ask a planner
//! for steps, execute and verify them, repeat until the goal is reached.
pub mod agent_engine;
pub mod config;
pub mod device;
pub mod errors;
pub mod executor;
pub mod perception;
pub mod planner;
pub mod verifier;

#[cfg(test)]
pub(crate) mod testing;

pub use agent_engine::{EventBus, Orchestrator, TaskEvent, TaskReport};
pub use errors::{PilotError, PilotResult};
