/// Element extraction from a `uiautomator dump` XML hierarchy.
///
/// The dump is parsed into a DOM and walked depth-first (parent before
/// children) with an explicit worklist. Output order is traversal order.
use std::sync::LazyLock;

use regex::Regex;

use crate::errors::{PilotError, PilotResult};
use crate::perception::types::{Bounds, UIElement};

static BOUNDS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\[(-?\d+),(-?\d+)\]\[(-?\d+),(-?\d+)\]\s*$").expect("static regex")
});

/// Dumps shorter than this are treated as junk (error banners, empty files).
const MIN_DUMP_LEN: usize = 100;

/// Parses `"[x1,y1][x2,y2]"`. Returns `None` for anything else.
pub fn parse_bounds(raw: &str) -> Option<Bounds> {
    let caps = BOUNDS_RE.captures(raw)?;
    let n = |i: usize| caps.get(i)?.as_str().parse::<i32>().ok();
    Some(Bounds::new(n(1)?, n(2)?, n(3)?, n(4)?))
}

/// Extracts the interactive elements of a hierarchy dump.
///
/// Returns `None` when the input is empty, not parseable, or yields no
/// element, so callers can tell "no snapshot" apart from an empty screen.
pub fn extract(snapshot: &str) -> Option<Vec<UIElement>> {
    if snapshot.trim().is_empty() {
        return None;
    }
    let doc = match roxmltree::Document::parse(snapshot) {
        Ok(doc) => doc,
        Err(e) => {
            tracing::debug!(error = %e, "UI hierarchy is not well-formed XML");
            return None;
        }
    };

    let mut elements = Vec::new();
    walk_nodes(&doc, |node| {
        let Some(bounds) = node.attribute("bounds").and_then(parse_bounds) else {
            return;
        };
        let clickable = node.attribute("clickable").is_some_and(is_truthy);
        if let Some(el) = UIElement::admit(
            node.attribute("text").unwrap_or_default(),
            node.attribute("content-desc").unwrap_or_default(),
            node.attribute("resource-id").unwrap_or_default(),
            node.attribute("class").unwrap_or_default(),
            bounds,
            clickable,
        ) {
            elements.push(el);
        }
    });

    tracing::debug!(count = elements.len(), "UI hierarchy elements extracted");
    (!elements.is_empty()).then_some(elements)
}

/// Heuristic validity check applied before trusting a hierarchy dump: long
/// enough, has the root marker, and at least one node with a real area.
pub fn is_usable(snapshot: &str) -> bool {
    let trimmed = snapshot.trim();
    if trimmed.len() <= MIN_DUMP_LEN || !trimmed.contains("<hierarchy") {
        return false;
    }
    let Ok(doc) = roxmltree::Document::parse(trimmed) else {
        return false;
    };
    let mut has_area = false;
    walk_nodes(&doc, |node| {
        if let Some(b) = node.attribute("bounds").and_then(parse_bounds) {
            has_area |= !b.is_degenerate();
        }
    });
    has_area
}

/// Attribute a node can be selected by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectBy {
    Text,
    ResourceId,
    ContentDesc,
    /// Any of text, content-desc or resource-id.
    Any,
}

impl SelectBy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "text" => Some(Self::Text),
            "resource-id" | "id" => Some(Self::ResourceId),
            "content-desc" | "desc" => Some(Self::ContentDesc),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeMatch {
    pub text: String,
    pub description: String,
    pub identifier: String,
    pub bounds: Option<Bounds>,
}

/// Finds the first node (in traversal order) whose selected attribute equals
/// or contains `value`.
pub fn find_node(snapshot: &str, by: SelectBy, value: &str) -> PilotResult<Option<NodeMatch>> {
    let doc = roxmltree::Document::parse(snapshot)
        .map_err(|e| PilotError::Snapshot(format!("cannot parse UI hierarchy: {e}")))?;

    let matches = |attr: Option<&str>| attr.is_some_and(|a| !a.is_empty() && a.contains(value));
    let mut found = None;
    walk_nodes(&doc, |node| {
        if found.is_some() {
            return;
        }
        let hit = match by {
            SelectBy::Text => matches(node.attribute("text")),
            SelectBy::ResourceId => matches(node.attribute("resource-id")),
            SelectBy::ContentDesc => matches(node.attribute("content-desc")),
            SelectBy::Any => {
                matches(node.attribute("text"))
                    || matches(node.attribute("content-desc"))
                    || matches(node.attribute("resource-id"))
            }
        };
        if hit {
            found = Some(NodeMatch {
                text: node.attribute("text").unwrap_or_default().to_string(),
                description: node.attribute("content-desc").unwrap_or_default().to_string(),
                identifier: node.attribute("resource-id").unwrap_or_default().to_string(),
                bounds: node.attribute("bounds").and_then(parse_bounds),
            });
        }
    });
    Ok(found)
}

/// Pre-order walk over every `<node>` element.
fn walk_nodes<'a, 'input, F>(doc: &'a roxmltree::Document<'input>, mut visit: F)
where
    F: FnMut(roxmltree::Node<'a, 'input>),
{
    let mut stack = vec![doc.root_element()];
    while let Some(node) = stack.pop() {
        if node.has_tag_name("node") {
            visit(node);
        }
        // Reversed so the first child is popped first.
        let children: Vec<_> = node.children().filter(|c| c.is_element()).collect();
        stack.extend(children.into_iter().rev());
    }
}

fn is_truthy(raw: &str) -> bool {
    matches!(raw.trim(), "true" | "1" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::types::Point;

    const SAMPLE: &str = r#"<?xml version='1.0' encoding='UTF-8' standalone='yes' ?>
<hierarchy rotation="0">
  <node index="0" text="" resource-id="" class="android.widget.FrameLayout" package="com.tencent.mm" content-desc="" clickable="false" bounds="[0,0][1080,2400]">
    <node index="0" text="微信" resource-id="com.tencent.mm:id/title" class="android.widget.TextView" package="com.tencent.mm" content-desc="" clickable="false" bounds="[40,100][240,180]" />
    <node index="1" text="" resource-id="" class="android.widget.ImageView" package="com.tencent.mm" content-desc="Search" clickable="true" bounds="[900,100][1000,180]">
      <node index="0" text="" resource-id="" class="android.view.View" package="com.tencent.mm" content-desc="" clickable="true" bounds="[10,20][110,220]" />
    </node>
    <node index="2" text="ghost" resource-id="" class="android.view.View" package="com.tencent.mm" content-desc="" clickable="true" bounds="[0,0][0,0]" />
  </node>
</hierarchy>"#;

    #[test]
    fn parse_bounds_accepts_only_the_bracket_form() {
        assert_eq!(parse_bounds("[1,2][3,4]"), Some(Bounds::new(1, 2, 3, 4)));
        assert_eq!(parse_bounds("[-5,0][10,10]"), Some(Bounds::new(-5, 0, 10, 10)));
        assert_eq!(parse_bounds("1,2,3,4"), None);
        assert_eq!(parse_bounds("[1,2][3]"), None);
        assert_eq!(parse_bounds(""), None);
    }

    #[test]
    fn extracts_in_preorder_and_applies_inclusion_rule() {
        let elements = extract(SAMPLE).unwrap();
        let labels: Vec<_> = elements.iter().map(|e| e.label().to_string()).collect();
        // Root frame has no content and is not clickable; ghost is zero-area.
        assert_eq!(labels, vec!["微信", "Search", ""]);
        assert_eq!(elements[0].identifier, "com.tencent.mm:id/title");
        assert_eq!(elements[0].center, Point { x: 140, y: 140 });
        assert_eq!(elements[1].class_name, "android.widget.ImageView");
    }

    #[test]
    fn bare_clickable_node_is_kept_with_empty_text() {
        let elements = extract(SAMPLE).unwrap();
        let bare = &elements[2];
        assert!(bare.clickable);
        assert_eq!(bare.text, "");
        assert_eq!(bare.center, Point { x: 60, y: 120 });
        assert_eq!(bare.bounds, Bounds::new(10, 20, 110, 220));
    }

    #[test]
    fn empty_garbage_or_elementless_input_is_none() {
        assert_eq!(extract(""), None);
        assert_eq!(extract("   \n"), None);
        assert_eq!(extract("ERROR: null root node returned by UiTestAutomationBridge."), None);
        assert_eq!(
            extract(r#"<hierarchy><node text="" clickable="false" bounds="[0,0][10,10]"/></hierarchy>"#),
            None
        );
    }

    #[test]
    fn unparseable_bounds_are_dropped_silently() {
        let xml = r#"<hierarchy>
            <node text="a" bounds="oops" />
            <node text="b" bounds="[0,0][20,20]" />
        </hierarchy>"#;
        let elements = extract(xml).unwrap();
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].text, "b");
    }

    #[test]
    fn extreme_bounds_are_extracted() {
        let xml = r#"<hierarchy><node text="a" bounds="[2000000000,0][2100000000,10]"/></hierarchy>"#;
        let elements = extract(xml).unwrap();
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].center, Point { x: 2_050_000_000, y: 5 });
    }

    #[test]
    fn usability_check_rejects_short_and_zero_area_dumps() {
        assert!(is_usable(SAMPLE));
        assert!(!is_usable("<hierarchy/>"));
        let zero_only = format!(
            "<?xml version='1.0' ?><hierarchy rotation=\"0\">{}</hierarchy>",
            r#"<node index="0" text="" class="android.widget.FrameLayout" bounds="[0,0][0,0]" />"#
        );
        assert!(zero_only.len() > MIN_DUMP_LEN);
        assert!(!is_usable(&zero_only));
    }

    #[test]
    fn find_node_by_attribute() {
        let hit = find_node(SAMPLE, SelectBy::ContentDesc, "Search").unwrap().unwrap();
        assert_eq!(hit.bounds, Some(Bounds::new(900, 100, 1000, 180)));

        let by_id = find_node(SAMPLE, SelectBy::ResourceId, "id/title").unwrap().unwrap();
        assert_eq!(by_id.text, "微信");

        assert!(find_node(SAMPLE, SelectBy::Text, "Contacts").unwrap().is_none());
        assert!(find_node(SAMPLE, SelectBy::Any, "ghost").unwrap().is_some());
        assert!(find_node("not xml", SelectBy::Any, "x").is_err());
    }
}
