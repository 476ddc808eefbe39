/// Fallback element extraction from the `dumpsys activity top` view dump.
///
/// Each view is one line: `class{hash VFEDHVCLX FSHAPD.. l,t-r,b #id pkg:id/name}`.
/// Coordinates are relative to the parent view, so absolute bounds are
/// accumulated from indentation depth. Text is not available in this format.
use std::sync::LazyLock;

use regex::Regex;

use crate::perception::types::{Bounds, UIElement};

static VIEW_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<indent>\s*)(?P<class>[\w.$]+)\{[0-9a-f]+\s+(?P<flags>[A-Z.]{9})\s+[A-Z.]{8}\s+(?P<l>-?\d+),(?P<t>-?\d+)-(?P<r>-?\d+),(?P<b>-?\d+)(?:\s+#[0-9a-f]+)?(?:\s+(?P<id>[^\s}]+))?",
    )
    .expect("static regex")
});

struct Frame {
    indent: usize,
    left: i32,
    top: i32,
    visible: bool,
}

/// Extracts visible views that carry an identifier or are clickable.
/// Same failure policy as the hierarchy extractor: `None` when nothing usable.
pub fn extract(dump: &str) -> Option<Vec<UIElement>> {
    if dump.trim().is_empty() {
        return None;
    }

    let mut elements = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();

    for line in dump.lines() {
        if line.trim_start().starts_with("View Hierarchy:") {
            stack.clear();
            continue;
        }
        let Some(caps) = VIEW_LINE_RE.captures(line) else {
            continue;
        };
        let indent = caps["indent"].len();
        while stack.last().is_some_and(|f| f.indent >= indent) {
            stack.pop();
        }

        let num = |name: &str| caps[name].parse::<i32>().ok();
        let (Some(l), Some(t), Some(r), Some(b)) = (num("l"), num("t"), num("r"), num("b")) else {
            continue;
        };
        let flags = caps["flags"].as_bytes();
        let (parent_left, parent_top, parent_visible) = stack
            .last()
            .map(|f| (f.left, f.top, f.visible))
            .unwrap_or((0, 0, true));

        // Start and end of one axis, shifted by the parent origin.
        let shift = |origin: i32, start: i32, end: i32| {
            let from = origin.checked_add(start)?;
            Some((from, from.checked_add(end.checked_sub(start)?)?))
        };
        let (Some((left, right)), Some((top, bottom))) = (shift(parent_left, l, r), shift(parent_top, t, b)) else {
            tracing::debug!(class = &caps["class"], "view bounds out of range, subtree skipped");
            stack.push(Frame { indent, left: parent_left, top: parent_top, visible: false });
            continue;
        };
        let bounds = Bounds::new(left, top, right, bottom);
        let visible = parent_visible && flags[0] == b'V';
        let clickable = flags[6] == b'C';
        let identifier = caps.name("id").map(|m| m.as_str()).unwrap_or_default();

        if visible {
            if let Some(el) = UIElement::admit("", "", identifier, &caps["class"], bounds, clickable) {
                elements.push(el);
            }
        }

        stack.push(Frame { indent, left, top, visible });
    }

    tracing::debug!(count = elements.len(), "view dump elements extracted");
    (!elements.is_empty()).then_some(elements)
}
