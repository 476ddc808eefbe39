use serde::Serialize;

use crate::device::DeviceDriver;
use crate::perception::types::{SnapshotSource, UIElement, WindowState};
use crate::perception::{hierarchy, view_dump, window};

/// Everything observed about the device at the start of one iteration.
/// Each part is independently optional.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeviceSnapshot {
    /// Raw hierarchy XML, when the primary dump was usable.
    #[serde(skip)]
    pub raw_hierarchy: Option<String>,
    pub elements: Option<Vec<UIElement>>,
    pub source: Option<SnapshotSource>,
    pub window: Option<WindowState>,
    #[serde(skip)]
    pub screenshot: Option<String>,
}

impl DeviceSnapshot {
    /// Whether the primary UI hierarchy was obtained this round.
    pub fn has_hierarchy(&self) -> bool {
        self.raw_hierarchy.is_some()
    }
}

/// Gathers UI hierarchy, window dump and screenshot concurrently, then
/// normalizes them. Falls back to the coarse view dump when the hierarchy is
/// missing or judged unusable.
pub async fn gather(driver: &dyn DeviceDriver, serial: &str) -> DeviceSnapshot {
    let (raw_hierarchy, raw_window, screenshot) = tokio::join!(
        driver.dump_ui_hierarchy(serial),
        driver.dump_window(serial),
        driver.capture_screenshot(serial),
    );

    let mut snapshot = DeviceSnapshot {
        window: raw_window.as_deref().and_then(window::extract),
        screenshot,
        ..DeviceSnapshot::default()
    };

    if let Some(xml) = raw_hierarchy.filter(|xml| hierarchy::is_usable(xml)) {
        snapshot.elements = hierarchy::extract(&xml);
        snapshot.source = snapshot.elements.as_ref().map(|_| SnapshotSource::Hierarchy);
        snapshot.raw_hierarchy = Some(xml);
        return snapshot;
    }

    tracing::debug!(serial, "UI hierarchy unavailable, trying view dump");
    if let Some(dump) = driver.dump_view_hierarchy(serial).await {
        snapshot.elements = view_dump::extract(&dump);
        snapshot.source = snapshot.elements.as_ref().map(|_| SnapshotSource::ViewDump);
    }
    snapshot
}
