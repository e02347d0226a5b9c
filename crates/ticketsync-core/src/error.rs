//! Error types for ticketsync-core

use thiserror::Error;

/// Result type alias using ticketsync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in ticketsync-core operations
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

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Local persistence cannot be opened or written; the store is read-only
    #[error("Local storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The ticket is in conflict and must be resolved first
    #[error("Ticket {0} is in conflict and must be resolved first")]
    Conflict(String),

    /// Record failed validation at the store boundary
    #[error("Validation failed: {0}")]
    Validation(String),
}

impl Error {
    /// Whether this error means the local store cannot accept writes.
    pub const fn is_storage_unavailable(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_))
    }
}
