use thiserror::Error;

#[derive(Debug, Error)]
pub enum PilotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Device error: {0}")]
    Device(String),

    #[error("No connected device available")]
    NoDevice,

    #[error("Device not ready: {0}")]
    DeviceNotReady(String),

    #[error("Command failed (exit {exit_code}): {command}: {stderr}")]
    CommandFailed {
        command: String,
        stderr: String,
        exit_code: i32,
    },

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Invalid {action} action: {reason}")]
    InvalidAction { action: String, reason: String },

    #[error("Action {action} is missing required parameter `{param}`")]
    MissingParameter { action: String, param: String },

    #[error("Planner error: {0}")]
    Planner(String),

    #[error("Plan parsing error: {0}")]
    PlanParse(String),

    #[error("Executor error: {0}")]
    Executor(String),

    #[error("Verification failed: {0}")]
    Verification(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

impl PilotError {
    pub(crate) fn invalid_action(action: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAction {
            action: action.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn missing(action: impl Into<String>, param: impl Into<String>) -> Self {
        Self::MissingParameter {
            action: action.into(),
            param: param.into(),
        }
    }
}

impl serde::Serialize for PilotError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

pub type PilotResult<T> = Result<T, PilotError>;
