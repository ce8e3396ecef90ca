use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] ferry_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Task ID cannot be empty")]
    EmptyTaskId,
    #[error("Invalid task ID '{0}'")]
    InvalidTaskId(String),
    #[error("Task not found: {0}")]
    TaskNotFound(String),
    #[error("No payload provided (pass it as an argument or pipe it on stdin)")]
    EmptyPayload,
    #[error("{path} must contain a JSON object")]
    NotAnObject { path: String },
    #[error("Field '{0}' was given both --take-local and --take-server")]
    ContradictoryChoice(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(
        "No backend configured. Pass --endpoint, set FERRY_API_BASE_URL, or run `ferry config init --api-base-url <URL>`."
    )]
    DrainNotConfigured,
}
