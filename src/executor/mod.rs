pub mod action;
pub mod dispatcher;
pub mod launch;
pub mod step;
pub mod text_input;
pub mod translator;

pub use step::{DeviceHandle, Executed, StepExecutor};
