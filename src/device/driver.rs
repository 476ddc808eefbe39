use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::AdbConfig;
use crate::errors::PilotResult;
use crate::perception::hierarchy;
use crate::perception::types::DeviceInfo;
use crate::perception::window::parse_focused_app;

static WM_SIZE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(Physical|Override) size:\s*(\d+)x(\d+)").expect("static regex")
});

/// Remote path `uiautomator dump` writes to before it is read back.
const UI_DUMP_PATH: &str = "/sdcard/view.xml";

/// Outcome of one device command. Timeouts and spawn failures are reported
/// here as `success == false` with exit code -1 rather than as errors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    pub fn failed(stderr: impl Into<String>, exit_code: i32) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code,
        }
    }
}

/// Per-call time bounds of a driver.
#[derive(Debug, Clone, Copy)]
pub struct DriverTimeouts {
    pub command: Duration,
    pub ui_dump: Duration,
    pub pull: Duration,
}

impl Default for DriverTimeouts {
    fn default() -> Self {
        Self::from(&AdbConfig::default())
    }
}

impl From<&AdbConfig> for DriverTimeouts {
    fn from(cfg: &AdbConfig) -> Self {
        Self {
            command: Duration::from_millis(cfg.command_timeout_ms),
            ui_dump: Duration::from_millis(cfg.ui_dump_timeout_ms),
            pull: Duration::from_millis(cfg.pull_timeout_ms),
        }
    }
}

/// Readiness facts gathered before a task starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Readiness {
    pub screen_on: bool,
    pub unlocked: bool,
    pub foreground: Option<String>,
}

impl Readiness {
    pub fn ready(&self) -> bool {
        self.screen_on && self.unlocked
    }

    pub fn issues(&self) -> Vec<&'static str> {
        let mut issues = Vec::new();
        if !self.screen_on {
            issues.push("screen is off");
        }
        if !self.unlocked {
            issues.push("device is locked");
        }
        issues
    }
}

/// Transport to a set of connected devices.
///
/// Only the primitive operations are required; the device queries the
/// control loop needs are provided on top of [`DeviceDriver::run_shell`].
#[async_trait]
pub trait DeviceDriver: Send + Sync {
    /// Runs one shell command on `serial`.
    async fn run_shell(&self, serial: &str, command: &str, timeout: Duration) -> CommandOutput;

    /// Runs a fully-qualified transport command (arguments after the binary).
    async fn run_adb(&self, args: &[String], timeout: Duration) -> CommandOutput;

    /// Current screen as base64-encoded PNG.
    async fn capture_screenshot(&self, serial: &str) -> Option<String>;

    async fn pull_file(&self, serial: &str, remote: &str, local: &str) -> bool;

    async fn list_devices(&self) -> PilotResult<Vec<DeviceInfo>>;

    fn timeouts(&self) -> DriverTimeouts {
        DriverTimeouts::default()
    }

    async fn shell(&self, serial: &str, command: &str) -> CommandOutput {
        self.run_shell(serial, command, self.timeouts().command).await
    }

    async fn device_info(&self, serial: &str) -> DeviceInfo {
        let (model, release, size) = tokio::join!(
            self.shell(serial, "getprop ro.product.model"),
            self.shell(serial, "getprop ro.build.version.release"),
            self.shell(serial, "wm size"),
        );
        let (screen_width, screen_height) = parse_wm_size(&size.stdout).unwrap_or((0, 0));
        let or_unknown = |out: CommandOutput| {
            let value = out.stdout.trim().to_string();
            if value.is_empty() { "Unknown".to_string() } else { value }
        };
        DeviceInfo {
            id: serial.to_string(),
            model: or_unknown(model),
            os_version: or_unknown(release),
            screen_width,
            screen_height,
        }
    }

    /// `package/activity` currently in the foreground.
    async fn foreground_app(&self, serial: &str) -> Option<String> {
        let out = self.shell(serial, "dumpsys activity activities").await;
        if let Some(app) = parse_focused_app(&out.stdout) {
            return Some(app);
        }
        let out = self.shell(serial, "dumpsys window").await;
        parse_focused_app(&out.stdout)
    }

    async fn is_screen_on(&self, serial: &str) -> bool {
        let out = self.shell(serial, "dumpsys power").await;
        screen_on_from_power_dump(&out.stdout)
    }

    async fn is_unlocked(&self, serial: &str) -> bool {
        let out = self.shell(serial, "dumpsys window").await;
        let focus = out
            .stdout
            .lines()
            .find(|l| l.contains("mCurrentFocus"))
            .unwrap_or_default();
        !["Keyguard", "LockScreen"].iter().any(|k| focus.contains(k))
    }

    async fn check_ready(&self, serial: &str) -> Readiness {
        let (screen_on, unlocked, foreground) = tokio::join!(
            self.is_screen_on(serial),
            self.is_unlocked(serial),
            self.foreground_app(serial),
        );
        Readiness { screen_on, unlocked, foreground }
    }

    /// Raw `uiautomator` XML, or `None` when the dump failed or looks unusable.
    async fn dump_ui_hierarchy(&self, serial: &str) -> Option<String> {
        let dump = self
            .run_shell(serial, &format!("uiautomator dump {UI_DUMP_PATH}"), self.timeouts().ui_dump)
            .await;
        if !dump.success {
            tracing::debug!(serial, stderr = %dump.stderr, "uiautomator dump failed");
            return None;
        }
        let read = self.shell(serial, &format!("cat {UI_DUMP_PATH}")).await;
        if hierarchy::is_usable(&read.stdout) {
            Some(read.stdout)
        } else {
            let preview: String = read.stdout.chars().take(200).collect();
            tracing::warn!(serial, len = read.stdout.len(), preview = %preview, "UI hierarchy unusable");
            None
        }
    }

    /// `dumpsys activity top`, the coarse fallback view dump.
    async fn dump_view_hierarchy(&self, serial: &str) -> Option<String> {
        let out = self.shell(serial, "dumpsys activity top").await;
        (out.success && !out.stdout.trim().is_empty()).then_some(out.stdout)
    }

    async fn dump_window(&self, serial: &str) -> Option<String> {
        let out = self.shell(serial, "dumpsys window windows").await;
        (out.success && !out.stdout.trim().is_empty()).then_some(out.stdout)
    }

    async fn file_exists(&self, serial: &str, path: &str) -> bool {
        let out = self
            .shell(serial, &format!("test -f {} && echo exists || echo not_exists", shell_quote(path)))
            .await;
        out.stdout.trim() == "exists"
    }

    async fn is_package_installed(&self, serial: &str, package: &str) -> bool {
        let out = self.shell(serial, &format!("pm list packages {package}")).await;
        out.stdout
            .lines()
            .any(|l| l.trim() == format!("package:{package}"))
    }

    /// Screen brightness scaled from the 0-255 setting to a percentage.
    async fn screen_brightness_percent(&self, serial: &str) -> Option<u32> {
        let out = self.shell(serial, "settings get system screen_brightness").await;
        let raw: f64 = out.stdout.trim().parse().ok()?;
        Some((raw / 255.0 * 100.0).round() as u32)
    }
}

/// Parses `wm size`, preferring an override over the physical size.
pub fn parse_wm_size(output: &str) -> Option<(u32, u32)> {
    let mut physical = None;
    for caps in WM_SIZE_RE.captures_iter(output) {
        let size = (caps[2].parse().ok()?, caps[3].parse().ok()?);
        if &caps[1] == "Override" {
            return Some(size);
        }
        physical = Some(size);
    }
    physical
}

/// Single-quotes `arg` for the device shell; embedded quotes become `'\''`.
pub fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

fn screen_on_from_power_dump(dump: &str) -> bool {
    if let Some(line) = dump.lines().find(|l| l.contains("mScreenOn")) {
        return line.contains("mScreenOn=true");
    }
    dump.contains("Display Power: state=ON") || dump.contains("mWakefulness=Awake")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedDriver;

    #[test]
    fn wm_size_prefers_override() {
        let out = "Physical size: 1080x2400\nOverride size: 720x1600\n";
        assert_eq!(parse_wm_size(out), Some((720, 1600)));
        assert_eq!(parse_wm_size("Physical size: 1080x2340"), Some((1080, 2340)));
        assert_eq!(parse_wm_size("error: no devices"), None);
    }

    #[test]
    fn power_dump_variants() {
        assert!(screen_on_from_power_dump("  mScreenOn=true\n"));
        assert!(!screen_on_from_power_dump("  mScreenOn=false\nmWakefulness=Awake"));
        assert!(screen_on_from_power_dump("Display Power: state=ON\n"));
        assert!(screen_on_from_power_dump("mWakefulness=Awake\n"));
        assert!(!screen_on_from_power_dump("mWakefulness=Asleep\n"));
    }

    #[tokio::test]
    async fn device_info_falls_back_to_unknown() {
        let driver = ScriptedDriver::new()
            .respond("getprop ro.product.model", "Pixel 7\n")
            .respond("wm size", "Physical size: 1080x2400\n");
        let info = driver.device_info("emu-1").await;
        assert_eq!(info.model, "Pixel 7");
        assert_eq!(info.os_version, "Unknown");
        assert_eq!((info.screen_width, info.screen_height), (1080, 2400));
    }

    #[tokio::test]
    async fn locked_device_is_not_ready() {
        let driver = ScriptedDriver::new()
            .respond("dumpsys power", "mScreenOn=true")
            .respond("dumpsys window", "  mCurrentFocus=Window{1 u0 NotificationShade Keyguard}\n");
        let readiness = driver.check_ready("emu-1").await;
        assert!(readiness.screen_on);
        assert!(!readiness.unlocked);
        assert!(!readiness.ready());
        assert_eq!(readiness.issues(), vec!["device is locked"]);
    }

    #[tokio::test]
    async fn ui_dump_is_rejected_when_unusable() {
        let driver = ScriptedDriver::new()
            .respond("uiautomator dump", "UI hierchary dumped to: /sdcard/view.xml")
            .respond("cat /sdcard/view.xml", "<hierarchy/>");
        assert_eq!(driver.dump_ui_hierarchy("emu-1").await, None);
    }

    #[tokio::test]
    async fn package_and_brightness_queries() {
        let driver = ScriptedDriver::new()
            .respond("pm list packages com.android.adbkeyboard", "package:com.android.adbkeyboard\n")
            .respond("settings get system screen_brightness", "128\n");
        assert!(driver.is_package_installed("s", "com.android.adbkeyboard").await);
        assert!(!driver.is_package_installed("s", "com.example.none").await);
        assert_eq!(driver.screen_brightness_percent("s").await, Some(50));
    }

    #[test]
    fn shell_quote_wraps_and_escapes() {
        assert_eq!(shell_quote("/sdcard/a.txt"), "'/sdcard/a.txt'");
        assert_eq!(shell_quote("it's; rm x"), r"'it'\''s; rm x'");
    }

    #[tokio::test]
    async fn file_check_quotes_the_path() {
        let driver = ScriptedDriver::new().respond("test -f '/sdcard/My Files/a.txt'", "exists\n");
        assert!(driver.file_exists("s", "/sdcard/My Files/a.txt").await);
        assert_eq!(driver.count("test -f '/sdcard/My Files/a.txt' && echo exists"), 1);
        assert!(!driver.file_exists("s", "/sdcard/$(reboot)").await);
        assert_eq!(driver.count("test -f '/sdcard/$(reboot)'"), 1);
    }
}
