//! Request and response bodies of the ticket REST endpoints

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{OffenceCategory, TicketStatus};

/// A ticket as returned by the server.
///
/// Fields the client does not interpret are kept in `details`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTicket {
    pub id: String,
    pub ticket_number: String,
    #[serde(default)]
    pub status: TicketStatus,
    #[serde(default)]
    pub total_fine: f64,
    #[serde(default)]
    pub issued_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(flatten)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

/// Row of a ticket listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketSummary {
    pub id: String,
    pub ticket_number: String,
    pub vehicle_reg: String,
    pub status: TicketStatus,
    pub total_fine: f64,
    pub issued_at: DateTime<Utc>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub officer_name: Option<String>,
    #[serde(default)]
    pub offence_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTicketResponse {
    pub ticket: CreatedTicket,
    #[serde(default)]
    pub print_data: Option<PrintData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedTicket {
    pub id: String,
    pub ticket_number: String,
    pub status: TicketStatus,
    pub total_fine: f64,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub payment_reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintData {
    pub qr_code: String,
    pub payment_instructions: String,
}

/// Partial update of a ticket already on the server
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TicketStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offences: Option<Vec<OffenceUpdate>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OffenceUpdate {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_fine: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedPhoto {
    pub photo_id: String,
    pub url: String,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
}

/// Listing filters; unset fields are not sent
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TicketFilters {
    pub search: Option<String>,
    pub status: Vec<TicketStatus>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub officer_id: Option<String>,
    pub station_id: Option<String>,
    pub region_id: Option<String>,
    pub min_amount: Option<f64>,
    pub max_amount: Option<f64>,
    pub category: Option<OffenceCategory>,
}

impl TicketFilters {
    pub(crate) fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        let mut text = |key: &'static str, value: Option<&str>| {
            if let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) {
                pairs.push((key, value.to_string()));
            }
        };
        text("search", self.search.as_deref());
        text("officerId", self.officer_id.as_deref());
        text("stationId", self.station_id.as_deref());
        text("regionId", self.region_id.as_deref());

        if !self.status.is_empty() {
            let joined = self
                .status
                .iter()
                .map(|status| status.as_str())
                .collect::<Vec<_>>()
                .join(",");
            pairs.push(("status", joined));
        }
        if let Some(date) = self.date_from {
            pairs.push(("dateFrom", date.format("%Y-%m-%d").to_string()));
        }
        if let Some(date) = self.date_to {
            pairs.push(("dateTo", date.format("%Y-%m-%d").to_string()));
        }
        if let Some(amount) = self.min_amount {
            pairs.push(("minAmount", amount.to_string()));
        }
        if let Some(amount) = self.max_amount {
            pairs.push(("maxAmount", amount.to_string()));
        }
        if let Some(category) = self.category {
            pairs.push(("category", category.as_str().to_string()));
        }
        pairs
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageRequest {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub sort_by: Option<String>,
    pub sort_order: Option<SortOrder>,
}

impl PageRequest {
    pub(crate) fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(page) = self.page.filter(|page| *page > 0) {
            pairs.push(("page", page.to_string()));
        }
        if let Some(limit) = self.limit.filter(|limit| *limit > 0) {
            pairs.push(("limit", limit.to_string()));
        }
        if let Some(sort_by) = &self.sort_by {
            pairs.push(("sortBy", sort_by.clone()));
        }
        if let Some(order) = self.sort_order {
            pairs.push(("sortOrder", order.as_str().to_string()));
        }
        pairs
    }
}

/// One page of a listing
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Page<T> {
    #[serde(rename = "data", alias = "items", default = "Vec::new")]
    pub items: Vec<T>,
    pub pagination: PageInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub page: u32,
    pub limit: u32,
    pub total_items: u64,
    pub total_pages: u32,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}
