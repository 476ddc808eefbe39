use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::errors::{PilotError, PilotResult};

static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+(?:\.\d+)?)\s*(ms|millis(?:econds?)?|毫秒|s|secs?|seconds?|秒)?\s*$")
        .expect("static regex")
});

/// Upper bound of the normalized coordinate space.
pub const NORM_MAX: f64 = 1000.0;

/// Point in the 0-1000 normalized coordinate space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormPoint {
    pub x: f64,
    pub y: f64,
}

/// High-level gesture issued by the planner.
#[derive(Debug, Clone, PartialEq)]
pub enum AbstractAction {
    Tap { at: NormPoint },
    DoubleTap { at: NormPoint },
    LongPress { at: NormPoint, duration_ms: Option<u64> },
    Swipe { start: NormPoint, end: NormPoint, duration_ms: Option<u64> },
    Type { text: String },
    Back,
    Home,
    Launch { app: String },
    Wait { duration_ms: u64 },
}

impl AbstractAction {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Tap { .. } => "Tap",
            Self::DoubleTap { .. } => "Double Tap",
            Self::LongPress { .. } => "Long Press",
            Self::Swipe { .. } => "Swipe",
            Self::Type { .. } => "Type",
            Self::Back => "Back",
            Self::Home => "Home",
            Self::Launch { .. } => "Launch",
            Self::Wait { .. } => "Wait",
        }
    }

    /// Parses `{"action": "Tap", "element": [x, y]}` and friends.
    ///
    /// Kind names are matched ignoring case, spaces and underscores, so
    /// `"Long Press"`, `"long_press"` and `"LongPress"` are the same action.
    pub fn from_map(map: &Map<String, Value>) -> PilotResult<Self> {
        let raw_kind = map
            .get("action")
            .or_else(|| map.get("type"))
            .and_then(Value::as_str)
            .ok_or_else(|| PilotError::missing("(unknown)", "action"))?;
        let normalized: String = raw_kind
            .chars()
            .filter(|c| !matches!(c, ' ' | '_' | '-'))
            .flat_map(char::to_lowercase)
            .collect();

        let action = match normalized.as_str() {
            "tap" | "click" => Self::Tap { at: point(map, "Tap", "element")? },
            "doubletap" => Self::DoubleTap { at: point(map, "Double Tap", "element")? },
            "longpress" => Self::LongPress {
                at: point(map, "Long Press", "element")?,
                duration_ms: gesture_duration(map, "Long Press")?,
            },
            "swipe" => Self::Swipe {
                start: point(map, "Swipe", "start")?,
                end: point(map, "Swipe", "end")?,
                duration_ms: gesture_duration(map, "Swipe")?,
            },
            "type" | "typename" | "input" => Self::Type { text: string(map, "Type", "text")? },
            "back" => Self::Back,
            "home" => Self::Home,
            "launch" | "open" => Self::Launch { app: string(map, "Launch", "app")? },
            "wait" => {
                let raw = map.get("duration").ok_or_else(|| PilotError::missing("Wait", "duration"))?;
                Self::Wait { duration_ms: wait_duration(raw)? }
            }
            _ => return Err(PilotError::invalid_action(raw_kind, "unknown action kind")),
        };
        Ok(action)
    }
}

fn point(map: &Map<String, Value>, kind: &str, key: &str) -> PilotResult<NormPoint> {
    let value = map.get(key).filter(|v| !v.is_null()).ok_or_else(|| PilotError::missing(kind, key))?;
    let items = value
        .as_array()
        .ok_or_else(|| PilotError::invalid_action(kind, format!("`{key}` must be [x, y], got {value}")))?;
    if items.len() != 2 {
        return Err(PilotError::invalid_action(
            kind,
            format!("`{key}` must have exactly 2 coordinates, got {}", items.len()),
        ));
    }
    let coord = |v: &Value| -> PilotResult<f64> {
        let n = match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
        .filter(|n| n.is_finite())
        .ok_or_else(|| PilotError::invalid_action(kind, format!("`{key}` coordinate {v} is not numeric")))?;
        if !(0.0..=NORM_MAX).contains(&n) {
            return Err(PilotError::invalid_action(
                kind,
                format!("`{key}` coordinate {n} is outside 0..={NORM_MAX}"),
            ));
        }
        Ok(n)
    };
    Ok(NormPoint { x: coord(&items[0])?, y: coord(&items[1])? })
}

fn string(map: &Map<String, Value>, kind: &str, key: &str) -> PilotResult<String> {
    match map.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(PilotError::missing(kind, key)),
    }
}

/// Optional gesture duration: a number of milliseconds, or a string with a unit.
fn gesture_duration(map: &Map<String, Value>, kind: &str) -> PilotResult<Option<u64>> {
    let Some(raw) = map.get("duration_ms").or_else(|| map.get("duration")) else {
        return Ok(None);
    };
    let ms = match raw {
        Value::Null => return Ok(None),
        Value::Number(n) => n.as_f64().filter(|n| *n >= 0.0).map(|n| n as u64),
        Value::String(s) => parse_duration_ms(s, 1),
        _ => None,
    };
    ms.map(Some)
        .ok_or_else(|| PilotError::invalid_action(kind, format!("invalid duration {raw}")))
}

fn wait_duration(raw: &Value) -> PilotResult<u64> {
    let ms = match raw {
        Value::Number(n) => n.as_f64().filter(|n| *n >= 0.0).map(|secs| (secs * 1000.0) as u64),
        Value::String(s) => parse_duration_ms(s, 1000),
        _ => None,
    };
    ms.ok_or_else(|| PilotError::invalid_action("Wait", format!("invalid duration {raw}")))
}

/// Parses `"2 seconds"`, `"1.5s"`, `"300ms"`, `"3秒"`. A bare number is scaled
/// by `bare_unit_ms`.
pub fn parse_duration_ms(raw: &str, bare_unit_ms: u64) -> Option<u64> {
    let caps = DURATION_RE.captures(raw)?;
    let value: f64 = caps[1].parse().ok()?;
    let unit_ms = match caps.get(2).map(|m| m.as_str()) {
        None => bare_unit_ms as f64,
        Some(u) if u == "ms" || u.starts_with("milli") || u == "毫秒" => 1.0,
        Some(_) => 1000.0,
    };
    Some((value * unit_ms).round() as u64)
}
