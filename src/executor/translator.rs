/// Abstract action → concrete device operations.
///
/// Coordinates arrive in the 0-1000 normalized space and are mapped to pixels
/// with `floor(n / 1000 * size)`.
use crate::errors::{PilotError, PilotResult};
use crate::executor::action::{AbstractAction, NormPoint, NORM_MAX};
use crate::executor::launch::{AppCatalog, LAUNCH_SETTLE_MS};

const TAP_MS: u64 = 100;
const DOUBLE_TAP_GAP_MS: u64 = 50;
const LONG_PRESS_MIN_MS: u64 = 1_000;
const SWIPE_DEFAULT_MS: u64 = 500;
const CLEAR_SETTLE_MS: u64 = 300;

const KEYCODE_HOME: u32 = 3;
const KEYCODE_BACK: u32 = 4;

/// One primitive the dispatcher knows how to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceOp {
    Shell(String),
    Sleep(u64),
    /// Clear the focused input field.
    ClearText,
    /// Type into the focused field; the injection path is chosen at dispatch.
    InputText(String),
    /// Start a package with the generic launch fallback chain.
    Launch(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcreteCommand {
    pub kind: &'static str,
    pub ops: Vec<DeviceOp>,
}

impl ConcreteCommand {
    /// Shell lines only, for logs.
    pub fn describe(&self) -> String {
        self.ops
            .iter()
            .map(|op| match op {
                DeviceOp::Shell(cmd) => cmd.clone(),
                DeviceOp::Sleep(ms) => format!("sleep {ms}ms"),
                DeviceOp::ClearText => "clear text".into(),
                DeviceOp::InputText(t) => format!("type {t:?}"),
                DeviceOp::Launch(pkg) => format!("launch {pkg}"),
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

pub fn to_pixels(p: NormPoint, width: u32, height: u32) -> (i64, i64) {
    (
        (p.x / NORM_MAX * width as f64).floor() as i64,
        (p.y / NORM_MAX * height as f64).floor() as i64,
    )
}

pub fn translate(
    action: &AbstractAction,
    width: u32,
    height: u32,
    catalog: &AppCatalog,
) -> PilotResult<ConcreteCommand> {
    let needs_screen = matches!(
        action,
        AbstractAction::Tap { .. }
            | AbstractAction::DoubleTap { .. }
            | AbstractAction::LongPress { .. }
            | AbstractAction::Swipe { .. }
    );
    if needs_screen && (width == 0 || height == 0) {
        return Err(PilotError::invalid_action(
            action.kind(),
            format!("screen size unknown ({width}x{height})"),
        ));
    }
    let px = |p: NormPoint| to_pixels(p, width, height);

    let ops = match action {
        AbstractAction::Tap { at } => {
            let (x, y) = px(*at);
            vec![DeviceOp::Shell(format!("input swipe {x} {y} {x} {y} {TAP_MS}"))]
        }
        AbstractAction::DoubleTap { at } => {
            let (x, y) = px(*at);
            vec![
                DeviceOp::Shell(format!("input tap {x} {y}")),
                DeviceOp::Sleep(DOUBLE_TAP_GAP_MS),
                DeviceOp::Shell(format!("input tap {x} {y}")),
            ]
        }
        AbstractAction::LongPress { at, duration_ms } => {
            let (x, y) = px(*at);
            let ms = duration_ms.unwrap_or(LONG_PRESS_MIN_MS).max(LONG_PRESS_MIN_MS);
            vec![DeviceOp::Shell(format!("input swipe {x} {y} {x} {y} {ms}"))]
        }
        AbstractAction::Swipe { start, end, duration_ms } => {
            let (x1, y1) = px(*start);
            let (x2, y2) = px(*end);
            let ms = duration_ms.unwrap_or(SWIPE_DEFAULT_MS);
            vec![DeviceOp::Shell(format!("input swipe {x1} {y1} {x2} {y2} {ms}"))]
        }
        AbstractAction::Type { text } => vec![
            DeviceOp::ClearText,
            DeviceOp::Sleep(CLEAR_SETTLE_MS),
            DeviceOp::InputText(text.clone()),
        ],
        AbstractAction::Back => vec![DeviceOp::Shell(format!("input keyevent {KEYCODE_BACK}"))],
        AbstractAction::Home => vec![DeviceOp::Shell(format!("input keyevent {KEYCODE_HOME}"))],
        AbstractAction::Launch { app } => {
            let package = catalog.resolve(app);
            let start = match catalog.dedicated_command(&package) {
                Some(cmd) => DeviceOp::Shell(cmd.to_string()),
                None => DeviceOp::Launch(package),
            };
            vec![start, DeviceOp::Sleep(LAUNCH_SETTLE_MS)]
        }
        AbstractAction::Wait { duration_ms } => vec![DeviceOp::Sleep(*duration_ms)],
    };

    Ok(ConcreteCommand { kind: action.kind(), ops })
}
