use serde::{Deserialize, Serialize};

use crate::config::default_wait_after;
use crate::perception::types::{DeviceInfo, UIElement, WindowState};

/// Steps the planner wants executed this iteration. An empty step list is
/// the only completion signal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub steps: Vec<ActionStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Plan {
    pub fn new(steps: Vec<ActionStep>) -> Self {
        Self { steps, message: None }
    }

    pub fn finished(message: impl Into<String>) -> Self {
        Self {
            steps: Vec::new(),
            message: Some(message.into()),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.steps.is_empty()
    }
}

fn null_as_empty<'de, D>(de: D) -> Result<Vec<ActionStep>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<ActionStep>>::deserialize(de)?.unwrap_or_default())
}

/// What to run for a step: a raw device shell string, or a declarative action
/// object translated at execution time.
#[derive(Debug, Clone, PartialEq)]
pub enum StepCommand {
    Raw(String),
    Action(serde_json::Map<String, serde_json::Value>),
}

impl StepCommand {
    /// Short text for logs and signatures.
    pub fn display(&self) -> String {
        match self {
            Self::Raw(cmd) => cmd.clone(),
            Self::Action(map) => serde_json::Value::Object(map.clone()).to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnFail {
    #[default]
    Retry,
    Abort,
    #[serde(alias = "replanRequest", alias = "replan")]
    ReplanRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_attempts", alias = "times")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff")]
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_attempts(),
            backoff_ms: default_backoff(),
        }
    }
}

fn default_attempts() -> u32 {
    1
}

fn default_backoff() -> u64 {
    500
}

/// One planner-issued step. Immutable once received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireStep", into = "WireStep")]
pub struct ActionStep {
    pub id: String,
    pub description: String,
    pub command: StepCommand,
    pub wait_after_ms: u64,
    pub verify: Vec<String>,
    pub on_fail: OnFail,
    pub retry_policy: RetryPolicy,
}

impl ActionStep {
    pub fn raw(id: impl Into<String>, cmd: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            command: StepCommand::Raw(cmd.into()),
            wait_after_ms: 0,
            verify: Vec::new(),
            on_fail: OnFail::Retry,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Replaces the `{serial}` placeholder in the command text.
    pub fn bind_serial(&self, serial: &str) -> Self {
        let mut step = self.clone();
        match &mut step.command {
            StepCommand::Raw(cmd) => *cmd = cmd.replace("{serial}", serial),
            StepCommand::Action(map) => {
                for value in map.values_mut() {
                    if let serde_json::Value::String(s) = value {
                        *s = s.replace("{serial}", serial);
                    }
                }
            }
        }
        step
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireStep {
    #[serde(default)]
    id: String,
    #[serde(default, alias = "desc")]
    description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cmd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    action: Option<serde_json::Value>,
    #[serde(default = "default_wait_after", alias = "wait_after")]
    wait_after_ms: u64,
    #[serde(default)]
    verify: Option<Vec<String>>,
    #[serde(default)]
    on_fail: OnFail,
    #[serde(default, alias = "retry")]
    retry_policy: RetryPolicy,
}

impl TryFrom<WireStep> for ActionStep {
    type Error = String;

    fn try_from(w: WireStep) -> Result<Self, Self::Error> {
        let command = match (w.cmd, w.action) {
            (_, Some(serde_json::Value::Object(map))) => StepCommand::Action(map),
            (Some(cmd), _) if !cmd.trim().is_empty() => StepCommand::Raw(cmd),
            (_, Some(other)) => {
                return Err(format!("step `{}`: action must be an object, got {other}", w.id));
            }
            _ => return Err(format!("step `{}` has neither `cmd` nor `action`", w.id)),
        };
        Ok(Self {
            id: w.id,
            description: w.description,
            command,
            wait_after_ms: w.wait_after_ms,
            verify: w.verify.unwrap_or_default(),
            on_fail: w.on_fail,
            retry_policy: w.retry_policy,
        })
    }
}

impl From<ActionStep> for WireStep {
    fn from(s: ActionStep) -> Self {
        let (cmd, action) = match s.command {
            StepCommand::Raw(cmd) => (Some(cmd), None),
            StepCommand::Action(map) => (None, Some(serde_json::Value::Object(map))),
        };
        Self {
            id: s.id,
            description: s.description,
            cmd,
            action,
            wait_after_ms: s.wait_after_ms,
            verify: Some(s.verify),
            on_fail: s.on_fail,
            retry_policy: s.retry_policy,
        }
    }
}

/// Compact record of an executed step, fed back to the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub description: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitialPlanRequest {
    pub goal: String,
    pub device: DeviceInfo,
    pub ui_summary: Option<String>,
    pub window: Option<WindowState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NextStepRequest {
    pub goal: String,
    pub device: DeviceInfo,
    pub history: Vec<HistoryEntry>,
    /// Operations repeated without progress; the planner should change approach.
    pub repetition_hints: Vec<String>,
    /// Set after repeated failures to obtain the UI hierarchy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ui_hint: Option<String>,
    pub window: Option<WindowState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    pub ui_elements: Option<Vec<UIElement>>,
}

/// Maximum number of elements listed in a UI summary.
const SUMMARY_LIMIT: usize = 50;

/// One line per element, `- label @ [x,y]`, with the center expressed in the
/// 0-1000 space the planner issues coordinates in.
pub fn summarize_elements(elements: &[UIElement], width: u32, height: u32) -> String {
    let (w, h) = (width.max(1) as f64, height.max(1) as f64);
    elements
        .iter()
        .take(SUMMARY_LIMIT)
        .map(|el| {
            let rx = (el.center.x as f64 / w * 1000.0).round() as i64;
            let ry = (el.center.y as f64 / h * 1000.0).round() as i64;
            let label = if el.label().is_empty() { "(clickable area)" } else { el.label() };
            format!("- {label} @ [{rx},{ry}]")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::types::Bounds;

    #[test]
    fn null_or_missing_steps_mean_completion() {
        let plan: Plan = serde_json::from_str(r#"{"steps": null, "message": "done"}"#).unwrap();
        assert!(plan.is_complete());
        let plan: Plan = serde_json::from_str(r#"{"completed": false}"#).unwrap();
        assert!(plan.is_complete());
    }

    #[test]
    fn wire_aliases_are_accepted() {
        let plan: Plan = serde_json::from_str(
            r#"{"steps":[{
                "id":"s1","desc":"open settings",
                "cmd":"am start -a android.settings.SETTINGS",
                "wait_after":1200,
                "verify":["check_foreground:com.android.settings"],
                "on_fail":"replan_request",
                "retry":{"times":3,"backoff_ms":100}
            }]}"#,
        )
        .unwrap();
        let step = &plan.steps[0];
        assert_eq!(step.description, "open settings");
        assert_eq!(step.wait_after_ms, 1200);
        assert_eq!(step.on_fail, OnFail::ReplanRequest);
        assert_eq!(step.retry_policy, RetryPolicy { max_attempts: 3, backoff_ms: 100 });
        assert!(matches!(&step.command, StepCommand::Raw(c) if c.starts_with("am start")));
    }

    #[test]
    fn defaults_apply_to_sparse_steps() {
        let step: ActionStep =
            serde_json::from_str(r#"{"id":"a","action":{"action":"Back"}}"#).unwrap();
        assert_eq!(step.wait_after_ms, 500);
        assert_eq!(step.on_fail, OnFail::Retry);
        assert_eq!(step.retry_policy, RetryPolicy::default());
        assert!(step.verify.is_empty());
    }

    #[test]
    fn step_without_command_is_rejected() {
        assert!(serde_json::from_str::<ActionStep>(r#"{"id":"a","desc":"nothing"}"#).is_err());
        assert!(serde_json::from_str::<ActionStep>(r#"{"id":"a","action":"Tap"}"#).is_err());
    }

    #[test]
    fn serial_placeholder_is_bound() {
        let step = ActionStep::raw("1", "adb -s {serial} shell input keyevent 3").bind_serial("emu-9");
        assert_eq!(step.command, StepCommand::Raw("adb -s emu-9 shell input keyevent 3".into()));
    }

    #[test]
    fn summary_uses_relative_coordinates() {
        let el = UIElement::admit("OK", "", "", "", Bounds::new(0, 0, 1080, 2400), true).unwrap();
        assert_eq!(summarize_elements(&[el], 1080, 2400), "- OK @ [500,500]");
    }
}
