//! Post-condition checks declared on a step as `method:param1:param2...`.
//!
//! Every check reads fresh device state; node checks re-dump the UI hierarchy
//! rather than reusing the iteration's snapshot.
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::device::{CommandOutput, DeviceDriver};
use crate::executor::DeviceHandle;
use crate::perception::hierarchy::{find_node, SelectBy};
use crate::planner::types::ActionStep;

/// Allowed distance between expected and actual brightness, in percent.
const BRIGHTNESS_TOLERANCE: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeGesture {
    Tap,
    LongTap,
}

/// A parsed verification descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyMethod {
    /// `check_foreground:<package>`
    Foreground(String),
    /// `check_file:<remote path>`
    File(String),
    /// `check_brightness:<percent>`
    Brightness(i64),
    /// `check_node:<text|id|desc substring>`
    Node(String),
    /// `uia_select:<by>:<value>[:tap|long_tap]`
    Select { by: SelectBy, value: String, gesture: NodeGesture },
}

impl VerifyMethod {
    pub fn parse(descriptor: &str) -> Result<Self, String> {
        let mut parts = descriptor.split(':');
        let method = parts.next().unwrap_or_default().trim();
        let params: Vec<&str> = parts.collect();
        let first = || {
            params
                .first()
                .map(|p| p.trim())
                .filter(|p| !p.is_empty())
                .ok_or_else(|| format!("{method} requires a parameter"))
        };

        match method {
            "check_foreground" => Ok(Self::Foreground(first()?.to_string())),
            "check_file" => Ok(Self::File(first()?.to_string())),
            "check_brightness" => {
                let raw = first()?;
                raw.parse()
                    .map(Self::Brightness)
                    .map_err(|_| format!("check_brightness: `{raw}` is not a number"))
            }
            // Selectors may themselves contain ':' (resource ids do).
            "check_node" => {
                let selector = params.join(":");
                if selector.is_empty() {
                    return Err("check_node requires a selector".into());
                }
                Ok(Self::Node(selector))
            }
            "uia_select" => {
                let by_raw = first()?;
                let by = SelectBy::parse(by_raw).ok_or_else(|| format!("uia_select: unknown selector `{by_raw}`"))?;
                let (value, gesture) = match params.last().map(|p| p.trim()) {
                    Some("tap") if params.len() > 2 => (params[1..params.len() - 1].join(":"), NodeGesture::Tap),
                    Some("long_tap") if params.len() > 2 => {
                        (params[1..params.len() - 1].join(":"), NodeGesture::LongTap)
                    }
                    _ => (params[1..].join(":"), NodeGesture::Tap),
                };
                if value.is_empty() {
                    return Err("uia_select requires a value".into());
                }
                Ok(Self::Select { by, value, gesture })
            }
            other => Err(format!("unknown method: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub descriptor: String,
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyResult {
    pub success: bool,
    pub message: String,
    pub details: Vec<CheckResult>,
}

#[derive(Clone)]
pub struct Verifier {
    driver: Arc<dyn DeviceDriver>,
}

impl Verifier {
    pub fn new(driver: Arc<dyn DeviceDriver>) -> Self {
        Self { driver }
    }

    /// Runs every declared check. Succeeds iff all checks pass; the message
    /// lists the reasons of the failing ones.
    pub async fn verify_step(
        &self,
        step: &ActionStep,
        device: &DeviceHandle,
        command_result: &CommandOutput,
    ) -> VerifyResult {
        if step.verify.is_empty() {
            return VerifyResult {
                success: true,
                message: "no verification declared".into(),
                details: Vec::new(),
            };
        }
        tracing::debug!(step_id = %step.id, exit_code = command_result.exit_code, checks = step.verify.len(), "verifying step");

        let mut details = Vec::with_capacity(step.verify.len());
        for descriptor in &step.verify {
            let check = match VerifyMethod::parse(descriptor) {
                Ok(method) => self.run(&method, &device.serial).await,
                Err(reason) => Err(reason),
            };
            let (success, message) = match check {
                Ok(msg) => (true, msg),
                Err(msg) => (false, msg),
            };
            if !success {
                tracing::warn!(step_id = %step.id, descriptor = %descriptor, reason = %message, "check failed");
            }
            details.push(CheckResult { descriptor: descriptor.clone(), success, message });
        }

        let failures: Vec<&str> = details.iter().filter(|d| !d.success).map(|d| d.message.as_str()).collect();
        let success = failures.is_empty();
        let message = if success {
            format!("all {} checks passed", details.len())
        } else {
            format!("failed checks: {}", failures.join("; "))
        };
        VerifyResult { success, message, details }
    }

    /// `Ok(message)` on pass, `Err(reason)` on failure.
    async fn run(&self, method: &VerifyMethod, serial: &str) -> Result<String, String> {
        match method {
            VerifyMethod::Foreground(expected) => {
                let actual = self
                    .driver
                    .foreground_app(serial)
                    .await
                    .ok_or("cannot determine foreground app")?;
                let package = actual.split('/').next().unwrap_or_default();
                if package == expected || actual.contains(expected.as_str()) {
                    Ok(format!("foreground is {actual}"))
                } else {
                    Err(format!("foreground mismatch: expected {expected}, got {actual}"))
                }
            }
            VerifyMethod::File(path) => {
                if self.driver.file_exists(serial, path).await {
                    Ok(format!("file exists: {path}"))
                } else {
                    Err(format!("file missing: {path}"))
                }
            }
            VerifyMethod::Brightness(expected) => {
                let actual = self
                    .driver
                    .screen_brightness_percent(serial)
                    .await
                    .ok_or("cannot read brightness")?;
                if (i64::from(actual) - expected).abs() <= BRIGHTNESS_TOLERANCE {
                    Ok(format!("brightness {actual}% (expected {expected}%)"))
                } else {
                    Err(format!("brightness {actual}%, expected {expected}%"))
                }
            }
            VerifyMethod::Node(selector) => {
                let xml = self.fresh_hierarchy(serial).await?;
                match find_node(&xml, SelectBy::Any, selector).map_err(|e| e.to_string())? {
                    Some(_) => Ok(format!("node found: {selector}")),
                    None => Err(format!("node not found: {selector}")),
                }
            }
            VerifyMethod::Select { by, value, gesture } => {
                let xml = self.fresh_hierarchy(serial).await?;
                let node = find_node(&xml, *by, value)
                    .map_err(|e| e.to_string())?
                    .ok_or_else(|| format!("element not found: {by:?}={value}"))?;
                let bounds = node.bounds.ok_or("element has no bounds")?;
                let c = bounds.center();
                let command = match gesture {
                    NodeGesture::Tap => format!("input tap {} {}", c.x, c.y),
                    NodeGesture::LongTap => format!("input swipe {} {} {} {} 1000", c.x, c.y, c.x, c.y),
                };
                let out = self.driver.shell(serial, &command).await;
                if !out.success {
                    return Err(format!("{command} failed: {}", out.stderr.trim()));
                }
                Ok(format!("{gesture:?} on {by:?}={value} at ({}, {})", c.x, c.y))
            }
        }
    }

    async fn fresh_hierarchy(&self, serial: &str) -> Result<String, String> {
        self.driver
            .dump_ui_hierarchy(serial)
            .await
            .ok_or_else(|| "cannot obtain UI hierarchy".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedDriver, SAMPLE_HIERARCHY};

    fn handle() -> DeviceHandle {
        DeviceHandle { serial: "emu-1".into(), screen_width: 1080, screen_height: 2400 }
    }

    fn step_with(checks: &[&str]) -> ActionStep {
        let mut step = ActionStep::raw("s1", "input keyevent 3");
        step.verify = checks.iter().map(|c| c.to_string()).collect();
        step
    }

    fn verifier(driver: ScriptedDriver) -> (Verifier, Arc<ScriptedDriver>) {
        let driver = Arc::new(driver);
        (Verifier::new(driver.clone()), driver)
    }

    fn hierarchy_driver() -> ScriptedDriver {
        ScriptedDriver::new()
            .respond("uiautomator dump", "dumped")
            .respond("cat /sdcard/view.xml", SAMPLE_HIERARCHY)
    }

    #[test]
    fn descriptor_parsing() {
        assert_eq!(
            VerifyMethod::parse("check_node:com.tencent.mm:id/title"),
            Ok(VerifyMethod::Node("com.tencent.mm:id/title".into()))
        );
        assert_eq!(
            VerifyMethod::parse("uia_select:text:Search:long_tap"),
            Ok(VerifyMethod::Select { by: SelectBy::Text, value: "Search".into(), gesture: NodeGesture::LongTap })
        );
        assert_eq!(
            VerifyMethod::parse("uia_select:resource-id:com.tencent.mm:id/title"),
            Ok(VerifyMethod::Select {
                by: SelectBy::ResourceId,
                value: "com.tencent.mm:id/title".into(),
                gesture: NodeGesture::Tap
            })
        );
        assert!(VerifyMethod::parse("check_brightness:bright").is_err());
        assert!(VerifyMethod::parse("check_foreground").is_err());
    }

    #[tokio::test]
    async fn no_checks_pass_trivially() {
        let (v, _) = verifier(ScriptedDriver::new());
        let res = v.verify_step(&step_with(&[]), &handle(), &CommandOutput::ok("")).await;
        assert!(res.success);
        assert!(res.details.is_empty());
    }

    #[tokio::test]
    async fn unknown_method_fails_closed() {
        let (v, _) = verifier(ScriptedDriver::new());
        let res = v.verify_step(&step_with(&["check_vibes:good"]), &handle(), &CommandOutput::ok("")).await;
        assert!(!res.success);
        assert!(res.message.contains("unknown method: check_vibes"));
    }

    #[tokio::test]
    async fn foreground_and_brightness() {
        let (v, _) = verifier(
            ScriptedDriver::new()
                .respond(
                    "dumpsys activity activities",
                    "  mResumedActivity: ActivityRecord{1 u0 com.android.settings/.Settings t3}\n",
                )
                .respond("settings get system screen_brightness", "130"),
        );
        let res = v
            .verify_step(
                &step_with(&["check_foreground:com.android.settings", "check_brightness:48"]),
                &handle(),
                &CommandOutput::ok(""),
            )
            .await;
        assert!(res.success, "{}", res.message);
        assert_eq!(res.details.len(), 2);

        let res = v
            .verify_step(&step_with(&["check_foreground:com.tencent.mm"]), &handle(), &CommandOutput::ok(""))
            .await;
        assert!(!res.success);
        assert!(res.message.contains("expected com.tencent.mm"));
    }

    #[tokio::test]
    async fn node_checks_refetch_hierarchy() {
        let (v, driver) = verifier(hierarchy_driver());
        let res = v
            .verify_step(&step_with(&["check_node:微信", "check_node:Contacts"]), &handle(), &CommandOutput::ok(""))
            .await;
        assert!(!res.success);
        assert!(res.details[0].success);
        assert_eq!(res.message, "failed checks: node not found: Contacts");
        assert_eq!(driver.count("uiautomator dump"), 2);
    }

    #[tokio::test]
    async fn missing_hierarchy_fails_node_checks() {
        let (v, _) = verifier(ScriptedDriver::new().fail("uiautomator dump", "null root node"));
        let res = v.verify_step(&step_with(&["check_node:OK"]), &handle(), &CommandOutput::ok("")).await;
        assert!(!res.success);
        assert!(res.message.contains("cannot obtain UI hierarchy"));
    }

    #[tokio::test]
    async fn select_taps_node_center() {
        let (v, driver) = verifier(hierarchy_driver());
        let res = v
            .verify_step(&step_with(&["uia_select:content-desc:Search:tap"]), &handle(), &CommandOutput::ok(""))
            .await;
        assert!(res.success, "{}", res.message);
        assert_eq!(driver.count("input tap 950 140"), 1);
    }
}
