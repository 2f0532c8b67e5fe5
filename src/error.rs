//! Error types for NeuroNudge core

use thiserror::Error;

/// Errors that can occur while accounting activity or evaluating state
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid signal: {0}")]
    InvalidSignal(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Timed out: {0}")]
    Timeout(String),
}
