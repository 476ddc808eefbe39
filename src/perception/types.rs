use serde::{Deserialize, Serialize};

/// Pixel-space rectangle as reported by the device (`[left,top][right,bottom]`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Bounds {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self { left, top, right, bottom }
    }

    /// Zero or negative width/height.
    pub fn is_degenerate(&self) -> bool {
        self.right <= self.left || self.bottom <= self.top
    }

    /// Floored midpoint. Summed in i64 so edges near `i32::MAX` cannot overflow.
    pub fn center(&self) -> Point {
        let mid = |a: i32, b: i32| (i64::from(a) + i64::from(b)).div_euclid(2) as i32;
        Point {
            x: mid(self.left, self.right),
            y: mid(self.top, self.bottom),
        }
    }
}

impl std::fmt::Display for Bounds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{},{}][{},{}]", self.left, self.top, self.right, self.bottom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

/// One interactive element of a UI snapshot, in pixel space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UIElement {
    pub text: String,
    pub description: String,
    pub identifier: String,
    pub class_name: String,
    pub bounds: Bounds,
    pub center: Point,
    pub clickable: bool,
}

impl UIElement {
    /// Builds an element if it passes the inclusion rule: non-degenerate bounds
    /// and at least one of text, description, identifier or clickable.
    pub fn admit(
        text: &str,
        description: &str,
        identifier: &str,
        class_name: &str,
        bounds: Bounds,
        clickable: bool,
    ) -> Option<Self> {
        if bounds.is_degenerate() {
            return None;
        }
        if text.is_empty() && description.is_empty() && identifier.is_empty() && !clickable {
            return None;
        }
        Some(Self {
            text: text.to_string(),
            description: description.to_string(),
            identifier: identifier.to_string(),
            class_name: class_name.to_string(),
            bounds,
            center: bounds.center(),
            clickable,
        })
    }

    /// Short human label: text, else description, else identifier.
    pub fn label(&self) -> &str {
        [&self.text, &self.description, &self.identifier]
            .into_iter()
            .find(|s| !s.is_empty())
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// Compact summary of the window manager state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowState {
    pub focused_app: Option<String>,
    pub has_keyboard: bool,
    /// `"<title> <bounds|unknown>"`, in dump order.
    pub visible_windows: Vec<String>,
}

/// Static facts about a connected device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: String,
    pub model: String,
    pub os_version: String,
    pub screen_width: u32,
    pub screen_height: u32,
}

/// Where the element list of a snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotSource {
    Hierarchy,
    ViewDump,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn center_floors_odd_sums() {
        assert_eq!(Bounds::new(0, 0, 3, 5).center(), Point { x: 1, y: 2 });
        assert_eq!(Bounds::new(10, 20, 110, 220).center(), Point { x: 60, y: 120 });
        assert_eq!(Bounds::new(-5, -5, 0, 0).center(), Point { x: -3, y: -3 });
    }

    #[test]
    fn center_of_extreme_bounds() {
        let b = Bounds::new(2_000_000_000, 0, 2_100_000_000, 10);
        assert_eq!(b.center(), Point { x: 2_050_000_000, y: 5 });
        let max = Bounds::new(i32::MAX - 1, i32::MIN, i32::MAX, i32::MIN + 3);
        assert_eq!(max.center(), Point { x: i32::MAX - 1, y: i32::MIN + 1 });
    }

    #[test]
    fn admit_requires_content_or_clickable() {
        let b = Bounds::new(0, 0, 10, 10);
        assert!(UIElement::admit("", "", "", "android.view.View", b, false).is_none());
        assert!(UIElement::admit("", "", "", "android.view.View", b, true).is_some());
        assert!(UIElement::admit("", "desc", "", "", b, false).is_some());
        assert!(UIElement::admit("", "", "app:id/x", "", b, false).is_some());
    }

    #[test]
    fn admit_drops_degenerate_bounds_regardless_of_content() {
        let flat = Bounds::new(5, 5, 5, 50);
        let inverted = Bounds::new(50, 60, 40, 70);
        assert!(UIElement::admit("OK", "ok", "id/ok", "", flat, true).is_none());
        assert!(UIElement::admit("OK", "ok", "id/ok", "", inverted, true).is_none());
    }
}
