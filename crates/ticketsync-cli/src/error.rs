use std::io;
use std::path::PathBuf;

use thiserror::Error;
use ticketsync_core::sync::{SyncError, TransportError};

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] ticketsync_core::Error),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Ticket ID cannot be empty")]
    EmptyTicketId,
    #[error("Ticket not found for id/prefix/number: {0}")]
    TicketNotFound(String),
    #[error("{0}")]
    AmbiguousTicketId(String),
    #[error("Could not read ticket payload from {path}: {message}")]
    InvalidPayload { path: PathBuf, message: String },
    #[error("Unsupported photo file {0}; use a .jpg, .png, .webp or .heic image")]
    UnsupportedPhoto(PathBuf),
    #[error("Search query cannot be empty")]
    EmptySearchQuery,
    #[error(
        "Sync is not configured. Set TICKETSYNC_API_URL (and TICKETSYNC_AUTH_TOKEN), or pass --config with an api_base_url."
    )]
    SyncNotConfigured,
}
