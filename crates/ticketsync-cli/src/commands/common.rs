use std::env;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use ticketsync_core::models::{SyncConflict, SyncLogEntry};
use ticketsync_core::sync::{HttpSyncTransport, SyncEngine};
use ticketsync_core::{
    LocalStore, OfflineTickets, SyncSettings, SyncStatus, Ticket, TicketId, TicketPayload,
};

use crate::error::CliError;

const DB_PATH_ENV: &str = "TICKETSYNC_DB_PATH";
const CONFIG_PATH_ENV: &str = "TICKETSYNC_CONFIG";
const SHORT_ID_LEN: usize = 13;

/// Paths and settings every command works from
#[derive(Debug, Clone)]
pub struct Context {
    pub db_path: PathBuf,
    pub settings: SyncSettings,
}

impl Context {
    pub fn resolve(db_path: Option<PathBuf>, config: Option<PathBuf>) -> Result<Self, CliError> {
        let config_path = resolve_config_path(config);
        let settings = SyncSettings::load(Some(&config_path))?;
        Ok(Self {
            db_path: resolve_db_path(db_path),
            settings,
        })
    }

    pub async fn open_store(&self) -> Result<LocalStore, CliError> {
        if let Some(parent) = self.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(LocalStore::open_or_degraded(self.db_path.clone()).await?)
    }

    pub async fn tickets(&self) -> Result<OfflineTickets, CliError> {
        let store = self.open_store().await?;
        Ok(OfflineTickets::new(store, &self.settings))
    }

    pub fn engine(&self, store: LocalStore) -> Result<SyncEngine<HttpSyncTransport>, CliError> {
        if self.settings.api_base_url.is_none() {
            return Err(CliError::SyncNotConfigured);
        }
        let transport = HttpSyncTransport::from_settings(&self.settings)?;
        Ok(SyncEngine::new(store, transport, &self.settings))
    }
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os(DB_PATH_ENV).map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ticketsync")
        .join("tickets.db")
}

pub fn resolve_config_path(cli_config: Option<PathBuf>) -> PathBuf {
    cli_config
        .or_else(|| env::var_os(CONFIG_PATH_ENV).map(PathBuf::from))
        .unwrap_or_else(default_config_path)
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ticketsync")
        .join("config.json")
}

pub fn normalize_ticket_query(query: &str) -> Result<String, CliError> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyTicketId)
    } else {
        Ok(trimmed.to_string())
    }
}

/// Find a ticket by exact ID, ticket number, or unique ID prefix.
pub fn find_ticket(tickets: &[Ticket], query: &str) -> Result<Ticket, CliError> {
    let query = normalize_ticket_query(query)?;

    if let Ok(id) = query.parse::<TicketId>() {
        if let Some(ticket) = tickets.iter().find(|ticket| ticket.id == id) {
            return Ok(ticket.clone());
        }
    }
    if let Some(ticket) = tickets
        .iter()
        .find(|ticket| ticket.payload.ticket_number.eq_ignore_ascii_case(&query))
    {
        return Ok(ticket.clone());
    }

    let prefix = query.to_ascii_lowercase();
    let matching = tickets
        .iter()
        .filter(|ticket| ticket.id.to_string().starts_with(&prefix))
        .take(3)
        .collect::<Vec<_>>();

    match matching.as_slice() {
        [] => Err(CliError::TicketNotFound(query)),
        [ticket] => Ok((*ticket).clone()),
        _ => {
            let options = matching
                .iter()
                .map(|ticket| short_id(&ticket.id))
                .collect::<Vec<_>>()
                .join(", ");
            Err(CliError::AmbiguousTicketId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

pub async fn resolve_ticket(tickets: &OfflineTickets, query: &str) -> Result<Ticket, CliError> {
    let query = normalize_ticket_query(query)?;
    if let Ok(id) = query.parse::<TicketId>() {
        if let Some(ticket) = tickets.get_ticket(&id).await? {
            return Ok(ticket);
        }
    }
    let all = tickets.local_tickets().await?;
    find_ticket(&all, &query)
}

/// Read a ticket payload from a JSON file, or stdin for `-`.
pub fn read_payload(path: &Path) -> Result<TicketPayload, CliError> {
    let raw = if path == Path::new("-") {
        let mut buffer = String::new();
        io::stdin().lock().read_to_string(&mut buffer)?;
        buffer
    } else {
        std::fs::read_to_string(path).map_err(|error| CliError::InvalidPayload {
            path: path.to_path_buf(),
            message: error.to_string(),
        })?
    };
    serde_json::from_str(&raw).map_err(|error| CliError::InvalidPayload {
        path: path.to_path_buf(),
        message: error.to_string(),
    })
}

pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        "heic" => Some("image/heic"),
        _ => None,
    }
}

pub fn short_id(id: &TicketId) -> String {
    id.to_string().chars().take(SHORT_ID_LEN).collect()
}

#[derive(Debug, Serialize)]
pub struct TicketListItem {
    pub id: String,
    pub ticket_number: String,
    pub vehicle_registration: String,
    pub total_fine: f64,
    pub sync_status: SyncStatus,
    pub server_id: Option<String>,
    pub updated_at: String,
    pub relative_time: String,
    pub last_error: Option<String>,
}

pub fn ticket_to_list_item(ticket: &Ticket) -> TicketListItem {
    let now_ms = Utc::now().timestamp_millis();
    TicketListItem {
        id: ticket.id.to_string(),
        ticket_number: ticket.payload.ticket_number.clone(),
        vehicle_registration: ticket.payload.vehicle.registration_number.clone(),
        total_fine: ticket.payload.total_fine,
        sync_status: ticket.sync_status,
        server_id: ticket.server_id.clone(),
        updated_at: ticket.local_updated_at.to_rfc3339(),
        relative_time: format_relative_time(ticket.local_updated_at.timestamp_millis(), now_ms),
        last_error: ticket.sync.last_error.clone(),
    }
}

pub fn format_ticket_lines(tickets: &[Ticket]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    tickets
        .iter()
        .map(|ticket| {
            let short_id = short_id(&ticket.id);
            let number = &ticket.payload.ticket_number;
            let registration = &ticket.payload.vehicle.registration_number;
            let fine = ticket.payload.total_fine;
            let status = ticket.sync_status.as_str();
            let relative_time =
                format_relative_time(ticket.local_updated_at.timestamp_millis(), now_ms);

            let line = format!(
                "{short_id:<13}  {number:<14}  {registration:<12}  {fine:>9.2}  {status:<8}  {relative_time}"
            );
            match &ticket.sync.last_error {
                Some(error) if ticket.sync_status == SyncStatus::Error => {
                    format!("{line}  ! {error}")
                }
                _ => line,
            }
        })
        .collect()
}

pub fn format_open_conflict_lines(tickets: &[Ticket]) -> Vec<String> {
    tickets
        .iter()
        .filter_map(|ticket| {
            let conflict = ticket.conflict.as_ref()?;
            Some(format!(
                "{}  {:<14}  {:<8}  {}  {}",
                short_id(&ticket.id),
                ticket.payload.ticket_number,
                conflict.kind,
                format_datetime(conflict.detected_at),
                conflict.reason.as_deref().unwrap_or("-")
            ))
        })
        .collect()
}

pub fn format_conflict_history_lines(conflicts: &[SyncConflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            let outcome = match (&conflict.resolution, conflict.resolved_at) {
                (Some(resolution), Some(resolved_at)) => {
                    format!("{resolution} at {}", format_timestamp(resolved_at))
                }
                _ => "open".to_string(),
            };
            format!(
                "{}  {:<8}  ticket={}  {}",
                format_timestamp(conflict.detected_at),
                conflict.kind,
                conflict.ticket_id,
                outcome
            )
        })
        .collect()
}

pub fn format_log_lines(entries: &[SyncLogEntry]) -> Vec<String> {
    entries
        .iter()
        .map(|entry| {
            let mut line = format!(
                "{}  {:<13}  {}",
                format_timestamp(entry.timestamp),
                entry.kind,
                entry.details
            );
            if let Some(count) = entry.item_count {
                line.push_str(&format!("  items={count}"));
            }
            if let Some(duration) = entry.duration_ms {
                line.push_str(&format!("  {duration}ms"));
            }
            line
        })
        .collect()
}

pub fn format_datetime(value: DateTime<Utc>) -> String {
    value.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    DateTime::from_timestamp_millis(timestamp_ms)
        .map_or_else(|| timestamp_ms.to_string(), format_datetime)
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
