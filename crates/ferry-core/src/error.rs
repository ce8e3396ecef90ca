//! Error types for ferry-core

use thiserror::Error;

/// Result type alias using ferry-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in ferry-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Task or draft not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A merge was committed before every conflicting field had a choice
    #[error("Unresolved conflicts: {resolved} of {total} fields resolved")]
    UnresolvedConflicts { resolved: usize, total: usize },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}
