use std::collections::HashSet;

use crate::errors::{PilotError, PilotResult};
use crate::planner::types::Plan;

/// Parses planner output into a validated [`Plan`].
///
/// Accepts bare JSON, JSON inside a Markdown code fence, or JSON surrounded by
/// prose. Anything without a parseable object is a `PlanParse` error.
pub fn parse_plan(text: &str) -> PilotResult<Plan> {
    let json = extract_json_object(text)
        .ok_or_else(|| PilotError::PlanParse(format!("no JSON object in planner output: {}", preview(text))))?;
    let plan: Plan = serde_json::from_str(json)
        .map_err(|e| PilotError::PlanParse(format!("{e}: {}", preview(json))))?;
    validate(&plan)?;
    Ok(plan)
}

/// Every step needs a non-empty id unique within the plan.
pub fn validate(plan: &Plan) -> PilotResult<()> {
    let mut seen = HashSet::new();
    for (i, step) in plan.steps.iter().enumerate() {
        if step.id.trim().is_empty() {
            return Err(PilotError::PlanParse(format!("step #{} has no id", i + 1)));
        }
        if !seen.insert(step.id.as_str()) {
            return Err(PilotError::PlanParse(format!("duplicate step id `{}`", step.id)));
        }
    }
    Ok(())
}

fn extract_json_object(text: &str) -> Option<&str> {
    let body = strip_code_fence(text.trim());
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    (end > start).then(|| &body[start..=end])
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.find("```").map(|i| &text[i + 3..]) else {
        return text;
    };
    // Drop the info string (`json`) on the opening fence line.
    let rest = rest.split_once('\n').map(|(_, r)| r).unwrap_or(rest);
    match rest.find("```") {
        Some(end) => &rest[..end],
        None => rest,
    }
}

fn preview(text: &str) -> String {
    text.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_json_with_prose() {
        let text = "Here is the plan:\n```json\n{\"steps\":[{\"id\":\"1\",\"cmd\":\"input keyevent 3\"}]}\n```\nGood luck.";
        let plan = parse_plan(text).unwrap();
        assert_eq!(plan.steps.len(), 1);
    }

    #[test]
    fn bare_object_in_prose() {
        let plan = parse_plan("sure {\"steps\": [], \"message\": \"all done\"} ok").unwrap();
        assert!(plan.is_complete());
        assert_eq!(plan.message.as_deref(), Some("all done"));
    }

    #[test]
    fn completion_flag_does_not_override_steps() {
        let plan = parse_plan(r#"{"completed": true, "steps": [{"id":"a","cmd":"input keyevent 4"}]}"#).unwrap();
        assert!(!plan.is_complete());
    }

    #[test]
    fn rejects_garbage_and_invalid_ids() {
        assert!(matches!(parse_plan("I cannot help with that."), Err(PilotError::PlanParse(_))));
        assert!(matches!(parse_plan("{not json}"), Err(PilotError::PlanParse(_))));
        let dup = r#"{"steps":[{"id":"a","cmd":"x"},{"id":"a","cmd":"y"}]}"#;
        assert!(matches!(parse_plan(dup), Err(PilotError::PlanParse(m)) if m.contains("duplicate")));
        let blank = r#"{"steps":[{"id":" ","cmd":"x"}]}"#;
        assert!(parse_plan(blank).is_err());
    }
}
