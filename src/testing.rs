//! In-memory doubles for the device transport and the planner.
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::device::{CommandOutput, DeviceDriver};
use crate::errors::PilotResult;
use crate::perception::types::DeviceInfo;
use crate::planner::types::{InitialPlanRequest, NextStepRequest, Plan};
use crate::planner::Planner;

pub const SAMPLE_HIERARCHY: &str = r#"<?xml version='1.0' encoding='UTF-8' standalone='yes' ?>
<hierarchy rotation="0">
  <node index="0" text="" resource-id="" class="android.widget.FrameLayout" package="com.tencent.mm" content-desc="" clickable="false" bounds="[0,0][1080,2400]">
    <node index="0" text="微信" resource-id="com.tencent.mm:id/title" class="android.widget.TextView" package="com.tencent.mm" content-desc="" clickable="false" bounds="[40,100][240,180]" />
    <node index="1" text="" resource-id="" class="android.widget.ImageView" package="com.tencent.mm" content-desc="Search" clickable="true" bounds="[900,100][1000,180]" />
    <node index="2" text="Chats" resource-id="com.tencent.mm:id/tab" class="android.widget.TextView" package="com.tencent.mm" content-desc="" clickable="true" bounds="[0,2250][270,2400]" />
  </node>
</hierarchy>"#;

struct Rule {
    prefix: String,
    outputs: Mutex<VecDeque<CommandOutput>>,
}

impl Rule {
    /// Pops queued outputs until one is left, which then repeats.
    fn next(&self) -> CommandOutput {
        let mut outputs = self.outputs.lock().unwrap();
        if outputs.len() > 1 {
            outputs.pop_front().unwrap()
        } else {
            outputs.front().cloned().unwrap_or_default()
        }
    }
}

/// Device driver answering commands from prefix rules. The longest matching
/// prefix wins; unscripted commands succeed with empty output.
#[derive(Default)]
pub struct ScriptedDriver {
    rules: Vec<Rule>,
    screenshot: Option<String>,
    devices: Vec<DeviceInfo>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// A driver whose single device is awake, unlocked and 1080x2400.
    pub fn ready_device(serial: &str) -> Self {
        Self::new()
            .with_device(DeviceInfo {
                id: serial.to_string(),
                model: "Pixel 7".into(),
                os_version: "14".into(),
                screen_width: 1080,
                screen_height: 2400,
            })
            .respond("dumpsys power", "  mScreenOn=true\n")
            .respond("getprop ro.product.model", "Pixel 7\n")
            .respond("getprop ro.build.version.release", "14\n")
            .respond("wm size", "Physical size: 1080x2400\n")
    }

    pub fn respond(self, prefix: &str, stdout: &str) -> Self {
        self.rule(prefix, vec![CommandOutput::ok(stdout)])
    }

    pub fn fail(self, prefix: &str, stderr: &str) -> Self {
        self.rule(prefix, vec![CommandOutput::failed(stderr, 1)])
    }

    /// Fails `failures` times, then succeeds with `stdout` from then on.
    pub fn flaky(self, prefix: &str, failures: usize, stdout: &str) -> Self {
        let mut outputs = vec![CommandOutput::failed("transient failure", 1); failures];
        outputs.push(CommandOutput::ok(stdout));
        self.rule(prefix, outputs)
    }

    pub fn screenshot(mut self, b64: &str) -> Self {
        self.screenshot = Some(b64.to_string());
        self
    }

    pub fn with_device(mut self, device: DeviceInfo) -> Self {
        self.devices.push(device);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of recorded calls containing `needle`.
    pub fn count(&self, needle: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| c.contains(needle)).count()
    }

    fn rule(mut self, prefix: &str, outputs: Vec<CommandOutput>) -> Self {
        self.rules.push(Rule { prefix: prefix.to_string(), outputs: Mutex::new(outputs.into()) });
        self
    }

    fn answer(&self, command: &str) -> CommandOutput {
        self.calls.lock().unwrap().push(command.to_string());
        self.rules
            .iter()
            .filter(|r| command.starts_with(&r.prefix))
            .max_by_key(|r| r.prefix.len())
            .map(Rule::next)
            .unwrap_or_else(|| CommandOutput::ok(""))
    }
}

#[async_trait]
impl DeviceDriver for ScriptedDriver {
    async fn run_shell(&self, _serial: &str, command: &str, _timeout: Duration) -> CommandOutput {
        self.answer(command)
    }

    async fn run_adb(&self, args: &[String], _timeout: Duration) -> CommandOutput {
        self.answer(&format!("adb {}", args.join(" ")))
    }

    async fn capture_screenshot(&self, _serial: &str) -> Option<String> {
        self.screenshot.clone()
    }

    async fn pull_file(&self, _serial: &str, remote: &str, local: &str) -> bool {
        self.answer(&format!("adb pull {remote} {local}")).success
    }

    async fn list_devices(&self) -> PilotResult<Vec<DeviceInfo>> {
        Ok(self.devices.clone())
    }
}

#[derive(Debug, Clone)]
pub enum PlannerCall {
    Initial(InitialPlanRequest),
    Next(NextStepRequest),
}

/// Planner returning queued plans in order, then `Plan::finished`.
#[derive(Default)]
pub struct ScriptedPlanner {
    plans: Mutex<VecDeque<PilotResult<Plan>>>,
    requests: Mutex<Vec<PlannerCall>>,
}

impl ScriptedPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(self, plan: PilotResult<Plan>) -> Self {
        self.plans.lock().unwrap().push_back(plan);
        self
    }

    pub fn requests(&self) -> Vec<PlannerCall> {
        self.requests.lock().unwrap().clone()
    }

    fn next(&self, call: PlannerCall) -> PilotResult<Plan> {
        self.requests.lock().unwrap().push(call);
        self.plans
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Plan::finished("script exhausted")))
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn request_initial_plan(&self, req: &InitialPlanRequest) -> PilotResult<Plan> {
        self.next(PlannerCall::Initial(req.clone()))
    }

    async fn request_next_step(&self, req: &NextStepRequest) -> PilotResult<Plan> {
        self.next(PlannerCall::Next(req.clone()))
    }
}
