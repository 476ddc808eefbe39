use serde::{Deserialize, Serialize};

use crate::device::CommandOutput;
use crate::verifier::VerifyResult;

/// Externally controlled status of a running task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Paused,
    Stopped,
}

/// How a task ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// The planner returned no further steps.
    Completed,
    /// The iteration cap was reached first.
    Exhausted,
    Stopped,
    /// A step with `on_fail = abort` failed.
    Aborted { step_id: String },
    /// Setup or planning failed; partial results are kept.
    Failed { reason: String },
}

/// Ledger record of one executed step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub description: String,
    pub iteration: u32,
    pub success: bool,
    pub command_result: Option<CommandOutput>,
    pub verify_result: Option<VerifyResult>,
    pub error: Option<String>,
    pub attempts: u32,
    pub finished_at: chrono::DateTime<chrono::Utc>,
}

impl StepResult {
    /// Key used for repetition tracking: the description, else the step id.
    pub fn signature(&self) -> &str {
        if self.description.is_empty() { &self.step_id } else { &self.description }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub iterations: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReport {
    pub task_id: String,
    pub outcome: TaskOutcome,
    pub success: bool,
    pub results: Vec<StepResult>,
    pub summary: Summary,
    pub message: String,
}

impl TaskReport {
    /// Success iff the planner signalled completion, or the cap was reached
    /// without a single failed step.
    pub fn is_success(outcome: &TaskOutcome, summary: &Summary) -> bool {
        match outcome {
            TaskOutcome::Completed => true,
            TaskOutcome::Exhausted => summary.failed == 0,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_prefers_description() {
        let mut result = StepResult {
            step_id: "s1".into(),
            description: "open wechat".into(),
            iteration: 1,
            success: true,
            command_result: None,
            verify_result: None,
            error: None,
            attempts: 1,
            finished_at: chrono::Utc::now(),
        };
        assert_eq!(result.signature(), "open wechat");
        result.description.clear();
        assert_eq!(result.signature(), "s1");
    }

    #[test]
    fn success_accounting() {
        let clean = Summary { total: 3, succeeded: 3, failed: 0, iterations: 20 };
        let dirty = Summary { failed: 1, ..clean.clone() };
        assert!(TaskReport::is_success(&TaskOutcome::Completed, &dirty));
        assert!(TaskReport::is_success(&TaskOutcome::Exhausted, &clean));
        assert!(!TaskReport::is_success(&TaskOutcome::Exhausted, &dirty));
        assert!(!TaskReport::is_success(&TaskOutcome::Stopped, &clean));
        assert!(!TaskReport::is_success(&TaskOutcome::Aborted { step_id: "s1".into() }, &clean));
    }

    #[test]
    fn outcome_is_tagged() {
        let json = serde_json::to_value(TaskOutcome::Aborted { step_id: "s2".into() }).unwrap();
        assert_eq!(json, serde_json::json!({"outcome": "aborted", "step_id": "s2"}));
    }
}
