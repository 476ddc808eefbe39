use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{PilotError, PilotResult};

const CONFIG_FILE: &str = "droidpilot.toml";
const CONFIG_ENV: &str = "DROIDPILOT_CONFIG";
const API_KEY_ENV: &str = "DROIDPILOT_PLANNER_API_KEY";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub adb: AdbConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// Extra human app name → package aliases, merged over the built-in table.
    #[serde(default)]
    pub apps: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdbConfig {
    #[serde(default = "default_adb_path")]
    pub path: String,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,
    /// `uiautomator dump` can take a long time on busy screens.
    #[serde(default = "default_ui_dump_timeout")]
    pub ui_dump_timeout_ms: u64,
    #[serde(default = "default_pull_timeout")]
    pub pull_timeout_ms: u64,
}

impl Default for AdbConfig {
    fn default() -> Self {
        Self {
            path: default_adb_path(),
            command_timeout_ms: default_command_timeout(),
            ui_dump_timeout_ms: default_ui_dump_timeout(),
            pull_timeout_ms: default_pull_timeout(),
        }
    }
}

fn default_adb_path() -> String {
    "adb".into()
}

fn default_command_timeout() -> u64 {
    8_000
}

fn default_ui_dump_timeout() -> u64 {
    20_000
}

fn default_pull_timeout() -> u64 {
    30_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// HTTP endpoint receiving plan requests.
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Falls back to env var DROIDPILOT_PLANNER_API_KEY.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_planner_timeout")]
    pub timeout_ms: u64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            model: None,
            api_key: None,
            timeout_ms: default_planner_timeout(),
        }
    }
}

fn default_planner_timeout() -> u64 {
    30_000
}

impl PlannerConfig {
    /// API key from the environment, else from the config file.
    pub fn resolved_api_key(&self) -> Option<String> {
        std::env::var(API_KEY_ENV)
            .ok()
            .filter(|k| !k.is_empty())
            .or_else(|| self.api_key.clone().filter(|k| !k.is_empty()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_iteration_delay")]
    pub iteration_delay_ms: u64,
    /// Write each task's ledger as JSONL under the platform data directory.
    #[serde(default)]
    pub persist_ledger: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            iteration_delay_ms: default_iteration_delay(),
            persist_ledger: false,
        }
    }
}

fn default_max_iterations() -> u32 {
    20
}

fn default_iteration_delay() -> u64 {
    300
}

/// `wait_after_ms` of a step that does not specify one.
pub(crate) fn default_wait_after() -> u64 {
    500
}

fn resolve_config_path() -> PilotResult<PathBuf> {
    if let Ok(explicit) = std::env::var(CONFIG_ENV) {
        let candidate = PathBuf::from(explicit);
        if candidate.exists() {
            tracing::debug!(path = %candidate.display(), "config taken from {CONFIG_ENV}");
            return Ok(candidate);
        }
        return Err(PilotError::Config(format!(
            "{CONFIG_ENV} points to a missing file: {}",
            candidate.display()
        )));
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join(CONFIG_FILE);
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join(CONFIG_FILE);
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    Err(PilotError::Config(format!(
        "{CONFIG_FILE} not found next to executable or in working directory"
    )))
}

pub fn parse_config(content: &str) -> PilotResult<AppConfig> {
    Ok(toml::from_str(content)?)
}

pub fn load_config() -> PilotResult<AppConfig> {
    let path = resolve_config_path()?;
    let content = std::fs::read_to_string(&path)?;
    let config = parse_config(&content)?;
    tracing::info!(
        path = %path.display(),
        adb = %config.adb.path,
        max_iterations = config.orchestrator.max_iterations,
        "config loaded"
    );
    Ok(config)
}

/// Like [`load_config`], but a missing or broken file yields the defaults.
pub fn load_config_or_default() -> AppConfig {
    match load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!(error = %e, "using default configuration");
            AppConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let cfg = parse_config("").unwrap();
        assert_eq!(cfg.adb.path, "adb");
        assert_eq!(cfg.adb.command_timeout_ms, 8_000);
        assert_eq!(cfg.adb.ui_dump_timeout_ms, 20_000);
        assert_eq!(cfg.orchestrator.max_iterations, 20);
        assert!(cfg.apps.is_empty());
    }

    #[test]
    fn sections_override_defaults() {
        let cfg = parse_config(
            r#"
            [adb]
            path = "/opt/platform-tools/adb"

            [planner]
            endpoint = "http://127.0.0.1:9000/plan"
            model = "ui-planner"

            [orchestrator]
            max_iterations = 5
            persist_ledger = true

            [apps]
            "Notes" = "com.example.notes"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.adb.path, "/opt/platform-tools/adb");
        assert_eq!(cfg.adb.pull_timeout_ms, 30_000);
        assert_eq!(cfg.planner.endpoint, "http://127.0.0.1:9000/plan");
        assert_eq!(cfg.planner.model.as_deref(), Some("ui-planner"));
        assert_eq!(cfg.orchestrator.max_iterations, 5);
        assert_eq!(cfg.orchestrator.iteration_delay_ms, 300);
        assert!(cfg.orchestrator.persist_ledger);
        assert_eq!(cfg.apps.get("Notes").map(String::as_str), Some("com.example.notes"));
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(matches!(
            parse_config("[adb\npath = 3"),
            Err(PilotError::TomlDe(_))
        ));
    }
}
