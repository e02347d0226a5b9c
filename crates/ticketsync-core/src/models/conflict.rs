//! Sync conflict model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ticket::TicketPayload;

/// How the local and server copies diverged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictKind {
    /// The server answered the submission with `conflict`
    Rejected,
    /// The server pushed its own version over unsent local changes
    Modified,
    /// The server deleted a ticket that still had unsent local changes
    Deleted,
}

impl ConflictKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rejected => "rejected",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rejected" => Ok(Self::Rejected),
            "modified" => Ok(Self::Modified),
            "deleted" => Ok(Self::Deleted),
            other => Err(format!("unknown conflict kind '{other}'")),
        }
    }
}

/// Open conflict attached to a ticket in `conflict` state.
///
/// `local_payload` is the officer's version and is never discarded by the
/// engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketConflict {
    pub kind: ConflictKind,
    pub local_payload: TicketPayload,
    /// Server version, when the server sent one
    pub server_payload: Option<TicketPayload>,
    pub reason: Option<String>,
    pub detected_at: DateTime<Utc>,
}

/// How an officer (or automation) settles a conflict
#[derive(Debug, Clone, PartialEq)]
pub enum ConflictResolution {
    /// Re-submit the officer's version
    KeepLocal,
    /// Take the server's version, or drop the ticket if the server deleted it
    AcceptServer,
    /// Re-submit a hand-merged payload
    Replace(TicketPayload),
}

impl ConflictResolution {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::KeepLocal => "keep_local",
            Self::AcceptServer => "accept_server",
            Self::Replace(_) => "replace",
        }
    }
}

/// Audit row for a conflict, kept after resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Conflict row identifier
    pub id: i64,
    /// Ticket involved in the conflict
    pub ticket_id: String,
    pub kind: ConflictKind,
    /// Officer's payload at detection time (JSON)
    pub local_payload: String,
    /// Server payload at detection time (JSON), if any
    pub server_payload: Option<String>,
    pub reason: Option<String>,
    /// Detection timestamp (unix ms)
    pub detected_at: i64,
    /// Resolution timestamp (unix ms)
    pub resolved_at: Option<i64>,
    /// Resolution name
    pub resolution: Option<String>,
}

impl SyncConflict {
    pub const fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}
