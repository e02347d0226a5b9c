//! Ticket model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::conflict::TicketConflict;
use super::ids::TicketId;
use super::sync_status::{SyncMeta, SyncStatus};
use crate::error::{Error, Result};

/// Largest rounding difference tolerated between `totalFine` and the offences.
const FINE_TOLERANCE: f64 = 0.005;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    #[default]
    Unpaid,
    Paid,
    Overdue,
    Objection,
    Cancelled,
}

impl TicketStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unpaid => "unpaid",
            Self::Paid => "paid",
            Self::Overdue => "overdue",
            Self::Objection => "objection",
            Self::Cancelled => "cancelled",
        }
    }
}

impl FromStr for TicketStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unpaid" => Ok(Self::Unpaid),
            "paid" => Ok(Self::Paid),
            "overdue" => Ok(Self::Overdue),
            "objection" => Ok(Self::Objection),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown ticket status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleType {
    #[default]
    Car,
    Motorcycle,
    Bus,
    Minibus,
    Truck,
    Trailer,
    Taxi,
    Tricycle,
    Other,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OffenceCategory {
    Speeding,
    Parking,
    Signal,
    Documentation,
    Safety,
    Reckless,
    Obstruction,
    #[default]
    Other,
}

impl OffenceCategory {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Speeding => "speeding",
            Self::Parking => "parking",
            Self::Signal => "signal",
            Self::Documentation => "documentation",
            Self::Safety => "safety",
            Self::Reckless => "reckless",
            Self::Obstruction => "obstruction",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleInfo {
    pub registration_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub make: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(rename = "type", default)]
    pub vehicle_type: VehicleType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverInfo {
    pub first_name: String,
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// One offence on a ticket, with the fine the officer applied
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedOffence {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub category: OffenceCategory,
    /// Fine in cedis
    pub fine: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// Domain fields of a citation. Opaque to the sync engine apart from
/// validation at the store boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketPayload {
    /// Human-readable number printed on the citation
    pub ticket_number: String,
    pub vehicle: VehicleInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<DriverInfo>,
    pub offences: Vec<SelectedOffence>,
    pub total_fine: f64,
    pub location: GeoLocation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub officer_id: String,
    pub issued_at: DateTime<Utc>,
    #[serde(default)]
    pub status: TicketStatus,
}

impl TicketPayload {
    /// Sum of the individual offence fines
    pub fn computed_total(&self) -> f64 {
        self.offences.iter().map(|offence| offence.fine).sum()
    }

    /// Check the payload before it is written to the store or sent.
    pub fn validate(&self) -> Result<()> {
        if self.ticket_number.trim().is_empty() {
            return Err(Error::Validation("ticket number is required".into()));
        }
        if self.vehicle.registration_number.trim().is_empty() {
            return Err(Error::Validation(
                "vehicle registration number is required".into(),
            ));
        }
        if self.officer_id.trim().is_empty() {
            return Err(Error::Validation("issuing officer is required".into()));
        }
        if self.offences.is_empty() {
            return Err(Error::Validation("at least one offence is required".into()));
        }
        for offence in &self.offences {
            if !offence.fine.is_finite() || offence.fine < 0.0 {
                return Err(Error::Validation(format!(
                    "offence {} has an invalid fine",
                    offence.id
                )));
            }
        }
        if !self.total_fine.is_finite()
            || (self.total_fine - self.computed_total()).abs() > FINE_TOLERANCE
        {
            return Err(Error::Validation(format!(
                "total fine {} does not match offences ({})",
                self.total_fine,
                self.computed_total()
            )));
        }
        if !(-90.0..=90.0).contains(&self.location.latitude)
            || !(-180.0..=180.0).contains(&self.location.longitude)
        {
            return Err(Error::Validation("location is out of range".into()));
        }
        Ok(())
    }
}

/// Whether the server already knows a ticket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Create,
    Update,
}

/// A citation as held in the local store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    /// Client-generated identifier, stable for the record's lifetime
    pub id: TicketId,
    /// Assigned once the server accepts the record
    pub server_id: Option<String>,
    pub sync_status: SyncStatus,
    pub payload: TicketPayload,
    pub local_updated_at: DateTime<Utc>,
    pub last_synced_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sync: SyncMeta,
    #[serde(default)]
    pub conflict: Option<TicketConflict>,
}

impl Ticket {
    /// A ticket issued on the device, waiting for its first sync
    #[must_use]
    pub fn new_offline(payload: TicketPayload) -> Self {
        Self {
            id: TicketId::new(),
            server_id: None,
            sync_status: SyncStatus::Pending,
            payload,
            local_updated_at: Utc::now(),
            last_synced_at: None,
            sync: SyncMeta::default(),
            conflict: None,
        }
    }

    /// A ticket first seen through a server update
    #[must_use]
    pub fn from_server(server_id: &str, payload: TicketPayload, synced_at: DateTime<Utc>) -> Self {
        Self {
            id: TicketId::for_server_record(server_id),
            server_id: Some(server_id.to_string()),
            sync_status: SyncStatus::Synced,
            payload,
            local_updated_at: synced_at,
            last_synced_at: Some(synced_at),
            sync: SyncMeta::default(),
            conflict: None,
        }
    }

    /// Action the next outbox sends for this ticket
    pub const fn action(&self) -> ChangeAction {
        if self.server_id.is_some() {
            ChangeAction::Update
        } else {
            ChangeAction::Create
        }
    }

    /// Apply an officer's edit as a new pending delta.
    pub fn apply_local_edit(&mut self, payload: TicketPayload) -> Result<()> {
        if self.sync_status == SyncStatus::Conflict {
            return Err(Error::Conflict(self.id.to_string()));
        }
        payload.validate()?;
        self.payload = payload;
        self.local_updated_at = Utc::now();
        self.sync_status = SyncStatus::Pending;
        self.sync.reset();
        Ok(())
    }

    /// Check the record-level invariants enforced by the store.
    pub fn validate(&self) -> Result<()> {
        if self.sync_status == SyncStatus::Synced && self.server_id.is_none() {
            return Err(Error::Validation(format!(
                "ticket {} cannot be synced without a server id",
                self.id
            )));
        }
        if self.sync_status == SyncStatus::Conflict && self.conflict.is_none() {
            return Err(Error::Validation(format!(
                "ticket {} is in conflict without conflict details",
                self.id
            )));
        }
        self.payload.validate()
    }
}
