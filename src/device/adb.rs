use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use regex::Regex;
use tokio::process::Command;

use crate::config::AdbConfig;
use crate::device::driver::{CommandOutput, DeviceDriver, DriverTimeouts};
use crate::errors::{PilotError, PilotResult};
use crate::perception::types::DeviceInfo;

static DEVICE_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\S+)\s+device\b").expect("static regex"));

/// Device driver backed by the `adb` command-line client.
pub struct AdbDriver {
    adb_path: String,
    timeouts: DriverTimeouts,
}

impl AdbDriver {
    pub fn new(cfg: &AdbConfig) -> Self {
        Self {
            adb_path: cfg.path.clone(),
            timeouts: DriverTimeouts::from(cfg),
        }
    }

    /// Spawns adb with `args`. Never fails: spawn errors and timeouts come back
    /// as a failed [`CommandOutput`] with exit code -1.
    async fn exec(&self, args: &[&str], timeout: Duration) -> CommandOutput {
        match self.exec_raw(args, timeout).await {
            Ok((code, stdout, stderr)) => CommandOutput {
                success: code == 0,
                stdout: String::from_utf8_lossy(&stdout).into_owned(),
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
                exit_code: code,
            },
            Err(e) => {
                tracing::warn!(args = ?args, error = %e, "adb command failed");
                CommandOutput::failed(e.to_string(), -1)
            }
        }
    }

    async fn exec_raw(&self, args: &[&str], timeout: Duration) -> PilotResult<(i32, Vec<u8>, Vec<u8>)> {
        let child = Command::new(&self.adb_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| PilotError::Device(format!("timed out after {}ms", timeout.as_millis())))??;

        Ok((output.status.code().unwrap_or(-1), output.stdout, output.stderr))
    }
}

#[async_trait]
impl DeviceDriver for AdbDriver {
    async fn run_shell(&self, serial: &str, command: &str, timeout: Duration) -> CommandOutput {
        tracing::debug!(serial, command, "adb shell");
        self.exec(&["-s", serial, "shell", command], timeout).await
    }

    async fn run_adb(&self, args: &[String], timeout: Duration) -> CommandOutput {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        tracing::debug!(args = ?args, "adb");
        self.exec(&args, timeout).await
    }

    async fn capture_screenshot(&self, serial: &str) -> Option<String> {
        match self
            .exec_raw(&["-s", serial, "exec-out", "screencap -p"], self.timeouts.pull)
            .await
        {
            Ok((0, png, _)) if !png.is_empty() => {
                Some(base64::engine::general_purpose::STANDARD.encode(png))
            }
            Ok((code, _, stderr)) => {
                tracing::warn!(serial, code, stderr = %String::from_utf8_lossy(&stderr), "screencap failed");
                None
            }
            Err(e) => {
                tracing::warn!(serial, error = %e, "screencap failed");
                None
            }
        }
    }

    async fn pull_file(&self, serial: &str, remote: &str, local: &str) -> bool {
        let out = self
            .exec(&["-s", serial, "pull", remote, local], self.timeouts.pull)
            .await;
        if !out.success {
            tracing::error!(serial, remote, stderr = %out.stderr, "pull failed");
        }
        out.success
    }

    async fn list_devices(&self) -> PilotResult<Vec<DeviceInfo>> {
        let out = self.exec(&["devices", "-l"], self.timeouts.command).await;
        if !out.success {
            return Err(PilotError::Device(format!("adb devices failed: {}", out.stderr.trim())));
        }
        let serials = parse_device_list(&out.stdout);
        tracing::debug!(count = serials.len(), "devices listed");
        let infos = futures_util::future::join_all(serials.iter().map(|s| self.device_info(s))).await;
        Ok(infos)
    }

    fn timeouts(&self) -> DriverTimeouts {
        self.timeouts
    }
}

/// Serials in the `device` state from `adb devices -l` (offline and
/// unauthorized entries are skipped).
pub fn parse_device_list(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|l| !l.starts_with("List of devices"))
        .filter_map(|l| DEVICE_LINE_RE.captures(l.trim()).map(|c| c[1].to_string()))
        .collect()
}
