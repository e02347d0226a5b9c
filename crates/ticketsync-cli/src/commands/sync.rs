use serde::Serialize;
use ticketsync_core::models::{SyncLogKind, TicketConflict};
use ticketsync_core::sync::{CycleReport, CycleRequest};

use crate::commands::common::{
    format_conflict_history_lines, format_datetime, format_log_lines, format_open_conflict_lines,
    print_json, Context,
};
use crate::error::CliError;

/// Follow-up cycles run when a backlog exceeds one batch
const MAX_FOLLOW_UPS: usize = 20;

#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub struct SyncTotals {
    pub cycles: usize,
    pub tickets_sent: usize,
    pub photos_sent: usize,
    pub tickets_synced: usize,
    pub tickets_failed: usize,
    pub photos_synced: usize,
    pub photos_failed: usize,
    pub conflicts: usize,
    pub server_updates: usize,
}

impl SyncTotals {
    pub fn add(&mut self, report: &CycleReport) {
        if report.exchanged {
            self.cycles += 1;
        }
        self.tickets_sent += report.tickets_sent;
        self.photos_sent += report.photos_sent;
        self.tickets_synced += report.reconcile.tickets_synced;
        self.tickets_failed += report.reconcile.tickets_failed;
        self.photos_synced += report.reconcile.photos_synced;
        self.photos_failed += report.reconcile.photos_failed;
        self.conflicts += report.reconcile.conflicts.len();
        self.server_updates += report.reconcile.server_updates_applied;
    }

    pub fn summary(&self) -> String {
        if self.cycles == 0 {
            return "Nothing to sync".to_string();
        }
        format!(
            "Sync completed: sent {} tickets and {} photos; {} synced, {} failed, {} conflicts, {} server updates",
            self.tickets_sent,
            self.photos_sent,
            self.tickets_synced + self.photos_synced,
            self.tickets_failed + self.photos_failed,
            self.conflicts,
            self.server_updates
        )
    }
}

pub async fn run_sync(context: &Context) -> Result<(), CliError> {
    let store = context.open_store().await?;
    let engine = context.engine(store)?;

    let mut totals = SyncTotals::default();
    let mut request = CycleRequest::PULL;
    for _ in 0..=MAX_FOLLOW_UPS {
        let report = engine.run_cycle(request).await?;
        totals.add(&report);
        if !report.has_more {
            break;
        }
        request = CycleRequest::PUSH;
    }

    println!("{}", totals.summary());
    Ok(())
}

#[derive(Debug, Serialize)]
struct StatusReport {
    unsynced: usize,
    conflicts: usize,
    failed: usize,
    last_successful_sync: Option<String>,
    server_watermark: Option<String>,
    last_error: Option<String>,
    degraded: bool,
}

pub async fn run_sync_status(as_json: bool, context: &Context) -> Result<(), CliError> {
    let store = context.open_store().await?;
    let counts = store.sync_counts().await?;
    let last_error = store
        .recent_log(1)
        .await?
        .into_iter()
        .find(|entry| entry.kind == SyncLogKind::SyncError)
        .map(|entry| entry.details);

    let report = StatusReport {
        unsynced: counts.unsynced,
        conflicts: counts.conflicts,
        failed: counts.failed,
        last_successful_sync: store.last_successful_sync().await?.map(format_datetime),
        server_watermark: store.watermark().await?.map(format_datetime),
        last_error,
        degraded: store.is_degraded(),
    };

    if as_json {
        return print_json(&report);
    }

    println!("Unsynced:    {}", report.unsynced);
    println!("Conflicts:   {}", report.conflicts);
    println!("Failed:      {}", report.failed);
    println!(
        "Last sync:   {}",
        report.last_successful_sync.as_deref().unwrap_or("never")
    );
    if let Some(error) = &report.last_error {
        println!("Last error:  {error}");
    }
    if report.degraded {
        println!("Local store is unavailable; running read-only.");
    }
    Ok(())
}

#[derive(Serialize)]
struct OpenConflictItem<'a> {
    ticket_id: String,
    ticket_number: &'a str,
    #[serde(flatten)]
    conflict: &'a TicketConflict,
}

pub async fn run_sync_conflicts(
    history: bool,
    limit: usize,
    as_json: bool,
    context: &Context,
) -> Result<(), CliError> {
    let tickets = context.tickets().await?;

    if history {
        let conflicts = tickets.conflict_history(limit, true).await?;
        if as_json {
            return print_json(&conflicts);
        }
        if conflicts.is_empty() {
            println!("No sync conflicts recorded.");
        }
        for line in format_conflict_history_lines(&conflicts) {
            println!("{line}");
        }
        return Ok(());
    }

    let open = tickets.conflicts().await?;
    if as_json {
        let items = open
            .iter()
            .filter_map(|ticket| {
                Some(OpenConflictItem {
                    ticket_id: ticket.id.to_string(),
                    ticket_number: &ticket.payload.ticket_number,
                    conflict: ticket.conflict.as_ref()?,
                })
            })
            .collect::<Vec<_>>();
        return print_json(&items);
    }
    if open.is_empty() {
        println!("No tickets waiting for a conflict decision.");
    }
    for line in format_open_conflict_lines(&open) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_sync_log(limit: usize, as_json: bool, context: &Context) -> Result<(), CliError> {
    let tickets = context.tickets().await?;
    let entries = tickets.sync_log(limit).await?;

    if as_json {
        return print_json(&entries);
    }
    if entries.is_empty() {
        println!("No sync activity yet.");
    }
    for line in format_log_lines(&entries) {
        println!("{line}");
    }
    Ok(())
}
