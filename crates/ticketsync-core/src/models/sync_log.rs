//! Persistent sync log entries

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncLogKind {
    SyncStart,
    SyncComplete,
    SyncError,
    Conflict,
    Retry,
}

impl SyncLogKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SyncStart => "sync_start",
            Self::SyncComplete => "sync_complete",
            Self::SyncError => "sync_error",
            Self::Conflict => "conflict",
            Self::Retry => "retry",
        }
    }
}

impl fmt::Display for SyncLogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncLogKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sync_start" => Ok(Self::SyncStart),
            "sync_complete" => Ok(Self::SyncComplete),
            "sync_error" => Ok(Self::SyncError),
            "conflict" => Ok(Self::Conflict),
            "retry" => Ok(Self::Retry),
            other => Err(format!("unknown sync log kind '{other}'")),
        }
    }
}

/// One line of the sync history shown to officers and support staff
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncLogEntry {
    pub id: i64,
    pub kind: SyncLogKind,
    pub details: String,
    pub item_count: Option<i64>,
    pub duration_ms: Option<i64>,
    /// Unix ms
    pub timestamp: i64,
}
