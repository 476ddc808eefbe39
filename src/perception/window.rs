/// Window-manager state extraction from `dumpsys window windows` (and the
/// focus records that `dumpsys activity activities` shares with it).
use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::perception::types::WindowState;

static RESUMED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:mResumedActivity|topResumedActivity|ResumedActivity)[:=]\s*ActivityRecord\{\S+\s+u\d+\s+([^\s}]+)")
        .expect("static regex")
});

static FOCUS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"mCurrentFocus=Window\{\S+\s+(?:u\d+\s+)?([^}]*)\}").expect("static regex")
});

static WINDOW_HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*Window #\d+ Window\{(\S+)\s+(?:u\d+\s+)?([^}]*)\}").expect("static regex")
});

static FRAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:mFrame|frame)=(\[-?\d+,-?\d+\]\[-?\d+,-?\d+\])").expect("static regex")
});

static RECT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Rect\((-?\d+), (-?\d+) - (-?\d+), (-?\d+)\)").expect("static regex")
});

/// Window titles that hold focus without being the foreground app.
const NON_CONTENT_WINDOWS: [&str; 3] = ["InputMethod", "StatusBar", "NavigationBar"];

fn is_content_window(title: &str) -> bool {
    !NON_CONTENT_WINDOWS.iter().any(|w| title.contains(w))
}

/// Resolves the foreground app as `package/activity`: the resumed-activity
/// record wins, then the first current-focus record that is not a system
/// overlay.
pub fn parse_focused_app(dump: &str) -> Option<String> {
    if let Some(caps) = RESUMED_RE.captures(dump) {
        return Some(caps[1].to_string());
    }
    FOCUS_RE
        .captures_iter(dump)
        .map(|c| c[1].trim().to_string())
        .find(|title| !title.is_empty() && is_content_window(title))
}

struct WindowRecord {
    token: String,
    title: String,
    frame: Option<String>,
    visible: bool,
}

/// Parses a raw window dump. Returns `None` for empty input or when no window
/// or focus record is recognisable.
pub fn extract(raw: &str) -> Option<WindowState> {
    if raw.trim().is_empty() {
        return None;
    }

    let mut records: Vec<WindowRecord> = Vec::new();
    let mut current: Option<WindowRecord> = None;

    for line in raw.lines() {
        if let Some(caps) = WINDOW_HEADER_RE.captures(line) {
            records.extend(current.take());
            current = Some(WindowRecord {
                token: caps[1].to_string(),
                title: caps[2].trim().to_string(),
                frame: None,
                visible: false,
            });
            continue;
        }
        let Some(win) = current.as_mut() else {
            continue;
        };
        if line.contains("isVisible=true") {
            win.visible = true;
        }
        if win.frame.is_none() {
            win.frame = frame_of(line);
        }
    }
    records.extend(current);

    let focused_app = parse_focused_app(raw);
    if records.is_empty() && focused_app.is_none() {
        tracing::debug!("window dump has no recognisable records");
        return None;
    }

    let mut seen = HashSet::new();
    let mut state = WindowState {
        focused_app,
        ..WindowState::default()
    };
    for rec in records.into_iter().filter(|r| r.visible) {
        if rec.title.contains("InputMethod") {
            state.has_keyboard = true;
        }
        if seen.insert(rec.token.clone()) {
            let bounds = rec.frame.as_deref().unwrap_or("unknown");
            state.visible_windows.push(format!("{} {}", rec.title, bounds));
        }
    }
    Some(state)
}

fn frame_of(line: &str) -> Option<String> {
    if let Some(caps) = FRAME_RE.captures(line) {
        return Some(caps[1].to_string());
    }
    RECT_RE
        .captures(line)
        .map(|c| format!("[{},{}][{},{}]", &c[1], &c[2], &c[3], &c[4]))
}
