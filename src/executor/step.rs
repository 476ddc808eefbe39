use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::device::{CommandOutput, DeviceDriver};
use crate::errors::{PilotError, PilotResult};
use crate::executor::action::AbstractAction;
use crate::executor::dispatcher::dispatch;
use crate::executor::launch::AppCatalog;
use crate::executor::text_input;
use crate::executor::translator::translate;
use crate::perception::types::DeviceInfo;
use crate::planner::types::{ActionStep, RetryPolicy, StepCommand};

static FULL_ADB_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^adb\s+(?:-s\s+\S+\s+)?(shell|exec-out|pull|push|install|uninstall)\b")
        .expect("static regex")
});

static INPUT_TEXT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"input\s+text\s+["'](.+?)["']"#).expect("static regex")
});

const LOG_PREVIEW_CHARS: usize = 200;

/// Addresses one device for the duration of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceHandle {
    pub serial: String,
    pub screen_width: u32,
    pub screen_height: u32,
}

impl From<&DeviceInfo> for DeviceHandle {
    fn from(info: &DeviceInfo) -> Self {
        Self {
            serial: info.id.clone(),
            screen_width: info.screen_width,
            screen_height: info.screen_height,
        }
    }
}

/// Successful execution of a step and how many attempts it took.
#[derive(Debug, Clone)]
pub struct Executed {
    pub output: CommandOutput,
    pub attempts: u32,
}

pub fn is_full_adb_command(cmd: &str) -> bool {
    FULL_ADB_RE.is_match(cmd.trim())
}

/// Quoted text of an `input text "..."` fragment, if any.
pub fn embedded_input_text(cmd: &str) -> Option<&str> {
    INPUT_TEXT_RE.captures(cmd).and_then(|c| c.get(1)).map(|m| m.as_str())
}

fn preview(text: &str) -> String {
    text.chars().take(LOG_PREVIEW_CHARS).collect()
}

#[derive(Clone)]
pub struct StepExecutor {
    driver: Arc<dyn DeviceDriver>,
    catalog: Arc<AppCatalog>,
}

impl StepExecutor {
    pub fn new(driver: Arc<dyn DeviceDriver>, catalog: Arc<AppCatalog>) -> Self {
        Self { driver, catalog }
    }

    /// One attempt. Errors cover transport failure, non-zero exit and
    /// action validation.
    pub async fn execute(&self, step: &ActionStep, device: &DeviceHandle) -> PilotResult<CommandOutput> {
        let output = match &step.command {
            StepCommand::Raw(cmd) => self.run_raw(cmd, device).await?,
            StepCommand::Action(map) => {
                let action = AbstractAction::from_map(map)?;
                let concrete = translate(&action, device.screen_width, device.screen_height, &self.catalog)?;
                tracing::debug!(step_id = %step.id, kind = concrete.kind, ops = %concrete.describe(), "action translated");
                dispatch(self.driver.as_ref(), &device.serial, &concrete).await?
            }
        };
        tracing::debug!(step_id = %step.id, stdout = %preview(&output.stdout), "step command ok");
        Ok(output)
    }

    /// Attempts `1..=max_attempts` with a fixed backoff between attempts.
    /// The last error is returned when every attempt fails.
    pub async fn execute_with_retry(
        &self,
        step: &ActionStep,
        device: &DeviceHandle,
        policy: RetryPolicy,
    ) -> PilotResult<Executed> {
        let max = policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            tracing::info!(
                step_id = %step.id,
                desc = %step.description,
                command = %preview(&step.command.display()),
                attempt,
                max,
                "executing step"
            );
            match self.execute(step, device).await {
                Ok(output) => {
                    if attempt > 1 {
                        tracing::info!(step_id = %step.id, attempt, max, "step recovered after retry");
                    }
                    return Ok(Executed { output, attempts: attempt });
                }
                Err(e) if attempt < max => {
                    tracing::warn!(
                        step_id = %step.id,
                        error = %e,
                        backoff_ms = policy.backoff_ms,
                        "attempt {attempt}/{max} failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(policy.backoff_ms)).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(step_id = %step.id, error = %e, attempts = attempt, "step failed");
                    return Err(e);
                }
            }
        }
    }

    async fn run_raw(&self, cmd: &str, device: &DeviceHandle) -> PilotResult<CommandOutput> {
        let cmd = cmd.replace("{serial}", &device.serial);

        if let Some(text) = embedded_input_text(&cmd).filter(|t| text_input::needs_ime(t)) {
            tracing::debug!(serial = %device.serial, "raw input text rerouted through IME");
            return text_input::input_via_ime(self.driver.as_ref(), &device.serial, text).await;
        }

        let out = if is_full_adb_command(&cmd) {
            let mut args: Vec<String> = cmd.split_whitespace().skip(1).map(str::to_string).collect();
            if args.first().map(String::as_str) != Some("-s") {
                args.splice(0..0, ["-s".to_string(), device.serial.clone()]);
            }
            let timeouts = self.driver.timeouts();
            let timeout = match args.get(2).map(String::as_str) {
                Some("pull" | "push" | "install") => timeouts.pull,
                _ => timeouts.command,
            };
            self.driver.run_adb(&args, timeout).await
        } else {
            self.driver.shell(&device.serial, &cmd).await
        };

        if !out.success {
            return Err(PilotError::CommandFailed {
                command: cmd,
                stderr: if out.stderr.is_empty() { "unknown error".into() } else { out.stderr },
                exit_code: out.exit_code,
            });
        }
        Ok(out)
    }
}
