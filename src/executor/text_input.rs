// Text injection. Plain ASCII goes through `input text`; CJK and special
// characters go through the ADBKeyboard IME broadcast, which takes base64.
use std::time::Duration;

use base64::Engine as _;

use crate::device::{CommandOutput, DeviceDriver};
use crate::errors::{PilotError, PilotResult};

pub const IME_PACKAGE: &str = "com.android.adbkeyboard";
pub const IME_ID: &str = "com.android.adbkeyboard/.AdbIME";

/// Pause after switching IME so the broadcast receiver is registered.
const IME_SWITCH_DELAY_MS: u64 = 500;

/// Returns true if the text contains CJK (Chinese/Japanese/Korean) characters.
pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(|c| ('\u{4e00}'..='\u{9fff}').contains(&c)
        || ('\u{3040}'..='\u{309f}').contains(&c)
        || ('\u{30a0}'..='\u{30ff}').contains(&c))
}

/// Whether `text` would be mangled by the plain `input text` primitive.
pub fn needs_ime(text: &str) -> bool {
    contains_cjk(text)
        || text
            .chars()
            .any(|c| !(c.is_ascii_alphanumeric() || c.is_ascii_whitespace() || c == '%'))
}

/// Types into the focused field, picking the injection path from the content.
pub async fn input_text(driver: &dyn DeviceDriver, serial: &str, text: &str) -> PilotResult<CommandOutput> {
    if needs_ime(text) {
        tracing::debug!(serial, len = text.chars().count(), "routing text through IME");
        return input_via_ime(driver, serial, text).await;
    }
    let command = format!("input text \"{}\"", text.replace(' ', "%s"));
    let out = driver.shell(serial, &command).await;
    if !out.success {
        return Err(PilotError::CommandFailed {
            command,
            stderr: out.stderr,
            exit_code: out.exit_code,
        });
    }
    Ok(out)
}

pub async fn input_via_ime(driver: &dyn DeviceDriver, serial: &str, text: &str) -> PilotResult<CommandOutput> {
    activate_ime(driver, serial).await?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(text.as_bytes());
    let command = format!("am broadcast -a ADB_INPUT_B64 --es msg \"{encoded}\"");
    let out = driver.shell(serial, &command).await;
    if !out.success {
        return Err(PilotError::CommandFailed {
            command,
            stderr: out.stderr,
            exit_code: out.exit_code,
        });
    }
    Ok(out)
}

/// Clears the focused field. Without the IME this is a logged no-op.
pub async fn clear_text(driver: &dyn DeviceDriver, serial: &str) -> PilotResult<()> {
    if !driver.is_package_installed(serial, IME_PACKAGE).await {
        tracing::warn!(serial, "{IME_PACKAGE} not installed, field not cleared");
        return Ok(());
    }
    driver.shell(serial, &format!("ime set {IME_ID}")).await;
    let out = driver.shell(serial, "am broadcast -a ADB_CLEAR_TEXT").await;
    if !out.success {
        tracing::warn!(serial, stderr = %out.stderr, "clear text broadcast failed");
    }
    Ok(())
}

async fn activate_ime(driver: &dyn DeviceDriver, serial: &str) -> PilotResult<()> {
    if !driver.is_package_installed(serial, IME_PACKAGE).await {
        return Err(PilotError::Executor(format!(
            "{IME_PACKAGE} is not installed; cannot type non-ASCII text"
        )));
    }
    let out = driver.shell(serial, &format!("ime set {IME_ID}")).await;
    if !out.success {
        tracing::warn!(serial, stderr = %out.stderr, "ime set failed");
    }
    tokio::time::sleep(Duration::from_millis(IME_SWITCH_DELAY_MS)).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedDriver;

    #[test]
    fn ime_routing_rules() {
        assert!(contains_cjk("你好"));
        assert!(contains_cjk("カタカナ"));
        assert!(!contains_cjk("hello"));
        assert!(!needs_ime("hello world 42"));
        assert!(!needs_ime("50%"));
        assert!(needs_ime("a@b.com"));
        assert!(needs_ime("你好"));
        assert!(needs_ime("café"));
    }

    #[tokio::test]
    async fn ascii_uses_plain_input_with_escaped_spaces() {
        let driver = ScriptedDriver::new();
        input_text(&driver, "emu-1", "hello world").await.unwrap();
        assert_eq!(driver.count("input text \"hello%sworld\""), 1);
        assert_eq!(driver.count("am broadcast"), 0);
    }

    #[tokio::test]
    async fn cjk_goes_through_base64_broadcast() {
        let driver = ScriptedDriver::new().respond("pm list packages", "package:com.android.adbkeyboard\n");
        input_text(&driver, "emu-1", "你好").await.unwrap();
        assert_eq!(driver.count("ime set com.android.adbkeyboard/.AdbIME"), 1);
        assert_eq!(driver.count("am broadcast -a ADB_INPUT_B64 --es msg \"5L2g5aW9\""), 1);
        assert_eq!(driver.count("input text"), 0);
    }

    #[tokio::test]
    async fn missing_ime_is_an_error_for_typing_but_not_clearing() {
        let driver = ScriptedDriver::new();
        assert!(matches!(
            input_text(&driver, "emu-1", "你好").await,
            Err(PilotError::Executor(_))
        ));
        clear_text(&driver, "emu-1").await.unwrap();
        assert_eq!(driver.count("am broadcast"), 0);
    }
}
