use std::time::Duration;

use crate::device::{CommandOutput, DeviceDriver};
use crate::errors::{PilotError, PilotResult};
use crate::executor::launch::launch_package;
use crate::executor::text_input;
use crate::executor::translator::{ConcreteCommand, DeviceOp};

/// Runs the ops of a translated action in order. The first failing op ends
/// the command with an error; the combined stdout is returned otherwise.
pub async fn dispatch(
    driver: &dyn DeviceDriver,
    serial: &str,
    command: &ConcreteCommand,
) -> PilotResult<CommandOutput> {
    let mut stdout = Vec::new();
    for op in &command.ops {
        let out = match op {
            DeviceOp::Shell(cmd) => {
                let out = driver.shell(serial, cmd).await;
                if !out.success {
                    return Err(PilotError::CommandFailed {
                        command: cmd.clone(),
                        stderr: out.stderr,
                        exit_code: out.exit_code,
                    });
                }
                out
            }
            DeviceOp::Sleep(ms) => {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
                continue;
            }
            DeviceOp::ClearText => {
                text_input::clear_text(driver, serial).await?;
                continue;
            }
            DeviceOp::InputText(text) => text_input::input_text(driver, serial, text).await?,
            DeviceOp::Launch(package) => launch_package(driver, serial, package).await?,
        };
        if !out.stdout.trim().is_empty() {
            stdout.push(out.stdout.trim().to_string());
        }
    }
    Ok(CommandOutput::ok(stdout.join("\n")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedDriver;

    #[tokio::test]
    async fn stops_at_first_failing_shell_op() {
        let driver = ScriptedDriver::new().fail("input tap", "Error: injection failed");
        let cmd = ConcreteCommand {
            kind: "Double Tap",
            ops: vec![
                DeviceOp::Shell("input tap 1 1".into()),
                DeviceOp::Sleep(50),
                DeviceOp::Shell("input tap 1 1".into()),
            ],
        };
        let err = dispatch(&driver, "emu-1", &cmd).await.unwrap_err();
        assert!(matches!(err, PilotError::CommandFailed { .. }));
        assert_eq!(driver.count("input tap"), 1);
    }

    #[tokio::test]
    async fn collects_stdout() {
        let driver = ScriptedDriver::new().respond("echo", "hi\n");
        let cmd = ConcreteCommand {
            kind: "Raw",
            ops: vec![DeviceOp::Shell("echo a".into()), DeviceOp::Shell("echo b".into())],
        };
        let out = dispatch(&driver, "emu-1", &cmd).await.unwrap();
        assert!(out.success);
        assert_eq!(out.stdout, "hi\nhi");
    }
}
