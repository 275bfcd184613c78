use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DocsorError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Planning ambiguity: {0}")]
    PlanningAmbiguity(String),
    #[error("Structural violation: {0}")]
    StructuralViolation(String),
    #[error("Repair exhausted: {0}")]
    RepairExhausted(String),
    #[error("Path error: {0}")]
    PathError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Not found: {0}")]
    NotFound(String),
}

impl DocsorError {
    /// Configuration errors abort a run before any planning happens.
    pub fn is_config(&self) -> bool {
        matches!(self, DocsorError::ConfigError(_))
    }
}

/// Stable `MARKER: message payload=...` errors that tooling can grep for.
pub fn marker_error(marker: &str, message: &str, payload: Option<serde_json::Value>) -> DocsorError {
    match payload {
        Some(payload) => DocsorError::ValidationError(format!("{marker}: {message} payload={payload}")),
        None => DocsorError::ValidationError(format!("{marker}: {message}")),
    }
}

pub fn config_error(artifact: &str, message: impl std::fmt::Display) -> DocsorError {
    DocsorError::ConfigError(format!("{artifact}: {message}"))
}
