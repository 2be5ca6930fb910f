use thiserror::Error;

use crate::agent::AgentError;

/// Errors surfaced to the user at the boundary of a single action.
///
/// None of these are fatal: the orchestrator renders them inline and the next
/// interaction starts fresh.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Unsupported file format: {0}")]
    UnsupportedFileFormat(String),

    #[error("Error loading file: {0}")]
    FileRead(String),

    #[error("Database unavailable: {0}")]
    DatabaseUnavailable(String),

    #[error("Please enter a valid email address")]
    InvalidEmail,

    #[error("An error occurred: {0}")]
    AgentExecution(String),

    /// Keeps the raw message so the post-processor can salvage the answer from it.
    #[error("{0}")]
    AgentParsing(String),

    #[error("Sheet not found: {0}")]
    UnknownSheet(String),

    #[error("A question is already being answered for this session")]
    Busy,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<AgentError> for AppError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::OutputParsing { .. } => AppError::AgentParsing(err.to_string()),
            other => AppError::AgentExecution(other.to_string()),
        }
    }
}

impl From<csv::Error> for AppError {
    fn from(err: csv::Error) -> Self {
        AppError::FileRead(err.to_string())
    }
}

impl From<mongodb::error::Error> for AppError {
    fn from(err: mongodb::error::Error) -> Self {
        AppError::DatabaseUnavailable(err.to_string())
    }
}
