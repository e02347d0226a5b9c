//! Photo evidence model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ids::{PhotoId, TicketId};
use super::sync_status::{SyncMeta, SyncStatus};
use crate::error::{Error, Result};

/// Largest photo accepted into the store (10 MiB).
pub const MAX_PHOTO_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhotoKind {
    Vehicle,
    Plate,
    #[default]
    Evidence,
    Other,
}

impl PhotoKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Vehicle => "vehicle",
            Self::Plate => "plate",
            Self::Evidence => "evidence",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for PhotoKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PhotoKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vehicle" => Ok(Self::Vehicle),
            "plate" => Ok(Self::Plate),
            "evidence" => Ok(Self::Evidence),
            "other" => Ok(Self::Other),
            other => Err(format!("unknown photo kind '{other}'")),
        }
    }
}

/// Binary evidence attached to a ticket.
///
/// The bytes live in their own BLOB column, not in the JSON body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Photo {
    pub id: PhotoId,
    /// Local id of the parent ticket, which may not be synced yet
    pub ticket_id: TicketId,
    pub kind: PhotoKind,
    pub mime_type: String,
    #[serde(skip)]
    pub data: Vec<u8>,
    pub captured_at: DateTime<Utc>,
    pub server_id: Option<String>,
    pub remote_url: Option<String>,
    pub sync_status: SyncStatus,
    pub last_synced_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sync: SyncMeta,
}

impl Photo {
    /// Capture a new photo for a ticket.
    pub fn new(
        ticket_id: TicketId,
        kind: PhotoKind,
        mime_type: impl Into<String>,
        data: Vec<u8>,
    ) -> Result<Self> {
        let photo = Self {
            id: PhotoId::new(),
            ticket_id,
            kind,
            mime_type: mime_type.into().trim().to_ascii_lowercase(),
            data,
            captured_at: Utc::now(),
            server_id: None,
            remote_url: None,
            sync_status: SyncStatus::Pending,
            last_synced_at: None,
            sync: SyncMeta::default(),
        };
        photo.validate()?;
        Ok(photo)
    }

    /// Check the record-level invariants enforced by the store.
    pub fn validate(&self) -> Result<()> {
        if !self.mime_type.starts_with("image/") {
            return Err(Error::Validation(format!(
                "photo {} has unsupported MIME type '{}'",
                self.id, self.mime_type
            )));
        }
        if self.data.is_empty() {
            return Err(Error::Validation(format!("photo {} has no data", self.id)));
        }
        if self.data.len() > MAX_PHOTO_BYTES {
            return Err(Error::Validation(format!(
                "photo {} exceeds {MAX_PHOTO_BYTES} bytes",
                self.id
            )));
        }
        match self.sync_status {
            SyncStatus::Conflict => Err(Error::Validation(format!(
                "photo {} cannot be in conflict",
                self.id
            ))),
            SyncStatus::Synced if self.server_id.is_none() => Err(Error::Validation(format!(
                "photo {} cannot be synced without a server id",
                self.id
            ))),
            _ => Ok(()),
        }
    }
}
