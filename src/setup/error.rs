use thiserror::Error;

use super::steps::StepStatus;

#[derive(Error, Debug)]
pub enum SetupError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("State file {path} is corrupt: {reason}")]
    CorruptState { path: String, reason: String },

    #[error("Step {step} cannot move from {from} to {to}")]
    InvalidTransition {
        step: String,
        from: StepStatus,
        to: StepStatus,
    },

    #[error("Command failed: {0}")]
    Command(String),

    #[error("Empty command for step {0}")]
    EmptyCommand(String),
}

pub type Result<T> = std::result::Result<T, SetupError>;
