use async_trait::async_trait;

use crate::errors::PilotResult;
use crate::planner::types::{InitialPlanRequest, NextStepRequest, Plan};

/// External decision oracle producing step plans from observed device state.
/// The control loop only depends on this trait.
#[async_trait]
pub trait Planner: Send + Sync {
    /// Identifier used in logs.
    fn name(&self) -> &str;

    /// First iteration of a task.
    async fn request_initial_plan(&self, req: &InitialPlanRequest) -> PilotResult<Plan>;

    /// Every later iteration, with execution history and repetition hints.
    async fn request_next_step(&self, req: &NextStepRequest) -> PilotResult<Plan>;
}
