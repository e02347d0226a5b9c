//! Wire contract of the `/sync` endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ChangeAction, PhotoKind, TicketPayload};

/// One batched upload plus pull request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub last_sync_timestamp: DateTime<Utc>,
    pub tickets: Vec<TicketChange>,
    pub photos: Vec<PhotoUpload>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketChange {
    /// Local id; echoed back as `localId`
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    pub action: ChangeAction,
    pub data: TicketPayload,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoUpload {
    /// Parent's server id when known, else its local id
    pub ticket_id: String,
    pub photo_id: String,
    /// Base64 (standard alphabet) image bytes
    pub data: String,
    #[serde(rename = "type")]
    pub kind: PhotoKind,
    pub mime_type: String,
}

/// Per-record outcomes plus server-side deltas
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    pub sync_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub results: SyncResults,
    #[serde(default)]
    pub server_updates: ServerUpdates,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncResults {
    #[serde(default)]
    pub tickets: Vec<TicketResult>,
    #[serde(default)]
    pub photos: Vec<PhotoResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Success,
    Conflict,
    Error,
}

/// Machine-readable reason attached to a failed record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The payload will never be accepted as sent
    ValidationError,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketResult {
    pub local_id: String,
    #[serde(default)]
    pub server_id: Option<String>,
    pub status: ResultStatus,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_code: Option<ErrorCode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoResult {
    pub local_id: String,
    #[serde(default)]
    pub server_id: Option<String>,
    pub status: ResultStatus,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerUpdates {
    #[serde(default)]
    pub tickets: Vec<ServerTicketUpdate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateAction {
    Update,
    Delete,
}

/// A server-side change since the request's watermark.
///
/// `id` is the server id, or the local id for tickets the server has only
/// seen through this device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerTicketUpdate {
    pub id: String,
    pub action: UpdateAction,
    #[serde(default)]
    pub data: Option<TicketPayload>,
}
