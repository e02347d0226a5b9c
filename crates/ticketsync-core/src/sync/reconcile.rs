//! Reconciliation of server outcomes into local record state.
//!
//! Every transition is gated on the record's current status and stamped with
//! the response's `syncTimestamp`, so applying the same response twice leaves
//! the store exactly as applying it once.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::{Index, Record};
use crate::error::{Error, Result};
use crate::models::{
    ConflictKind, ConflictResolution, Photo, SyncStatus, Ticket, TicketConflict, TicketId,
    TicketPayload,
};
use crate::services::{LocalStore, StoreGuard};

use super::outbox::Outbox;
use super::protocol::{
    ErrorCode, PhotoResult, ResultStatus, ServerTicketUpdate, SyncResponse, TicketResult,
    UpdateAction,
};

const MISSING_SERVER_ID: &str = "server reported success without a server id";
const PARENT_NOT_SYNCED: &str = "parent ticket has no server id yet";
const SERVER_MODIFIED: &str = "server changed the ticket while local changes were unsent";
const SERVER_DELETED: &str = "server deleted the ticket while local changes were unsent";

/// Counts of what one response did to the store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub tickets_synced: usize,
    pub tickets_failed: usize,
    pub photos_synced: usize,
    pub photos_failed: usize,
    /// Tickets that entered `conflict` during this response
    pub conflicts: Vec<TicketId>,
    pub server_updates_applied: usize,
    /// Snapshot records without an outcome, returned to `pending`
    pub rolled_back: usize,
    pub watermark_advanced: bool,
}

/// Applies server outcomes and officer resolutions to the local store
#[derive(Clone)]
pub struct Reconciler {
    store: LocalStore,
    max_retries: u32,
}

impl Reconciler {
    pub const fn new(store: LocalStore, max_retries: u32) -> Self {
        Self { store, max_retries }
    }

    /// Apply a response to the snapshot it answers, atomically.
    pub async fn apply(&self, outbox: &Outbox, response: &SyncResponse) -> Result<ReconcileReport> {
        let guard = self.store.lock().await;
        guard.begin().await?;
        match self.apply_locked(&guard, outbox, response).await {
            Ok(report) => {
                guard.commit().await?;
                Ok(report)
            }
            Err(error) => {
                guard.rollback().await;
                Err(error)
            }
        }
    }

    async fn apply_locked(
        &self,
        guard: &StoreGuard<'_>,
        outbox: &Outbox,
        response: &SyncResponse,
    ) -> Result<ReconcileReport> {
        let sync_ts = response.sync_timestamp;
        let mut report = ReconcileReport::default();

        for result in &response.results.tickets {
            self.apply_ticket_result(guard, result, sync_ts, &mut report)
                .await?;
        }
        for result in &response.results.photos {
            self.apply_photo_result(guard, result, sync_ts, &mut report)
                .await?;
        }
        for update in &response.server_updates.tickets {
            apply_server_update(guard, update, sync_ts, &mut report).await?;
        }

        report.rolled_back = rollback_locked(guard, outbox).await?;
        let unanswered = unsettled_without_result(guard, outbox, response).await?;
        if report.rolled_back == 0 && unanswered == 0 {
            match guard.watermark().await? {
                Some(current) if current >= sync_ts => {
                    tracing::debug!("Watermark {current} already covers {sync_ts}");
                }
                _ => {
                    guard.advance_watermark(sync_ts, Utc::now()).await?;
                    report.watermark_advanced = true;
                }
            }
        } else {
            tracing::warn!(
                "{unanswered} snapshot records had no outcome ({} rolled back); watermark held",
                report.rolled_back
            );
        }

        Ok(report)
    }

    async fn apply_ticket_result(
        &self,
        guard: &StoreGuard<'_>,
        result: &TicketResult,
        sync_ts: DateTime<Utc>,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let Some(mut ticket) = guard.get::<Ticket>(&result.local_id).await? else {
            tracing::warn!("Result for unknown ticket {}", result.local_id);
            return Ok(());
        };

        match (result.status, ticket.sync_status) {
            (ResultStatus::Success, SyncStatus::Syncing) => {
                let Some(server_id) = result.server_id.clone() else {
                    self.fail_ticket(guard, ticket, Some(MISSING_SERVER_ID.to_string()), false)
                        .await?;
                    report.tickets_failed += 1;
                    return Ok(());
                };
                ticket.server_id = Some(server_id);
                ticket.sync_status = SyncStatus::Synced;
                ticket.last_synced_at = Some(sync_ts);
                ticket.sync.reset();
                ticket.conflict = None;
                guard.put(&ticket).await?;
                report.tickets_synced += 1;
            }
            // Edited during flight: keep the edit, remember the server copy.
            (ResultStatus::Success, SyncStatus::Pending) if ticket.server_id.is_none() => {
                if let Some(server_id) = result.server_id.clone() {
                    ticket.server_id = Some(server_id);
                    guard.put(&ticket).await?;
                }
            }
            (ResultStatus::Conflict, SyncStatus::Syncing) => {
                if ticket.server_id.is_none() {
                    ticket.server_id.clone_from(&result.server_id);
                }
                let conflict = TicketConflict {
                    kind: ConflictKind::Rejected,
                    local_payload: ticket.payload.clone(),
                    server_payload: None,
                    reason: result.error.clone(),
                    detected_at: sync_ts,
                };
                enter_conflict(guard, ticket, conflict, report).await?;
            }
            (ResultStatus::Error, SyncStatus::Syncing) => {
                let permanent = result.error_code == Some(ErrorCode::ValidationError);
                self.fail_ticket(guard, ticket, result.error.clone(), permanent)
                    .await?;
                report.tickets_failed += 1;
            }
            (status, current) => {
                tracing::debug!(
                    "Ignoring {status:?} result for ticket {} in {current}",
                    result.local_id
                );
            }
        }
        Ok(())
    }

    async fn fail_ticket(
        &self,
        guard: &StoreGuard<'_>,
        mut ticket: Ticket,
        error: Option<String>,
        permanent: bool,
    ) -> Result<()> {
        let exhausted = ticket
            .sync
            .record_failure(error, self.max_retries, permanent);
        ticket.sync_status = SyncStatus::Error;
        if exhausted {
            tracing::warn!(
                "Ticket {} stopped retrying after {} attempts",
                ticket.id,
                ticket.sync.attempts
            );
        }
        guard.put(&ticket).await
    }

    async fn apply_photo_result(
        &self,
        guard: &StoreGuard<'_>,
        result: &PhotoResult,
        sync_ts: DateTime<Utc>,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let Some(mut photo) = guard.get::<Photo>(&result.local_id).await? else {
            tracing::warn!("Result for unknown photo {}", result.local_id);
            return Ok(());
        };
        if photo.sync_status != SyncStatus::Syncing {
            return Ok(());
        }

        let failure = match result.status {
            ResultStatus::Success => {
                let parent = guard.get::<Ticket>(&photo.ticket_id.as_str()).await?;
                let parent_synced = parent.is_some_and(|parent| parent.server_id.is_some());
                match (&result.server_id, parent_synced) {
                    (Some(server_id), true) => {
                        photo.server_id = Some(server_id.clone());
                        photo.remote_url.clone_from(&result.url);
                        photo.sync_status = SyncStatus::Synced;
                        photo.last_synced_at = Some(sync_ts);
                        photo.sync.reset();
                        guard.put(&photo).await?;
                        report.photos_synced += 1;
                        return Ok(());
                    }
                    (None, _) => Some(MISSING_SERVER_ID.to_string()),
                    (Some(_), false) => Some(PARENT_NOT_SYNCED.to_string()),
                }
            }
            ResultStatus::Conflict | ResultStatus::Error => result.error.clone(),
        };

        photo.sync.record_failure(failure, self.max_retries, false);
        photo.sync_status = SyncStatus::Error;
        guard.put(&photo).await?;
        report.photos_failed += 1;
        Ok(())
    }

    /// Return snapshot records still `syncing` to `pending`.
    pub async fn rollback(&self, outbox: &Outbox) -> Result<usize> {
        let guard = self.store.lock().await;
        guard.begin().await?;
        match rollback_locked(&guard, outbox).await {
            Ok(count) => {
                guard.commit().await?;
                Ok(count)
            }
            Err(error) => {
                guard.rollback().await;
                Err(error)
            }
        }
    }

    /// Settle a conflict; returns the ticket, or `None` when it was removed.
    pub async fn resolve_conflict(
        &self,
        id: &TicketId,
        resolution: ConflictResolution,
    ) -> Result<Option<Ticket>> {
        let guard = self.store.lock().await;
        let mut ticket = guard
            .get::<Ticket>(&id.as_str())
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        let Some(conflict) = ticket.conflict.clone() else {
            return Err(Error::InvalidInput(format!("ticket {id} is not in conflict")));
        };

        let payload = match (&resolution, conflict.kind) {
            (ConflictResolution::AcceptServer, ConflictKind::Deleted) => None,
            (ConflictResolution::AcceptServer, _) => {
                Some(conflict.server_payload.clone().ok_or_else(|| {
                    Error::InvalidInput(format!("ticket {id} has no server version to accept"))
                })?)
            }
            (ConflictResolution::KeepLocal, _) => Some(conflict.local_payload.clone()),
            (ConflictResolution::Replace(payload), _) => {
                payload.validate()?;
                Some(payload.clone())
            }
        };

        let now = Utc::now();
        guard.begin().await?;
        let outcome = async {
            let kept = if let Some(payload) = payload {
                if matches!(resolution, ConflictResolution::KeepLocal)
                    && conflict.kind == ConflictKind::Deleted
                {
                    // The server copy is gone; submit as a new ticket.
                    ticket.server_id = None;
                }
                ticket.payload = payload;
                ticket.conflict = None;
                ticket.sync_status = SyncStatus::Pending;
                ticket.sync.reset();
                ticket.local_updated_at = now;
                guard.put(&ticket).await?;
                Some(ticket)
            } else {
                guard.delete::<Ticket>(&id.as_str()).await?;
                None
            };
            guard.mark_resolved(id, resolution.as_str(), now).await?;
            Ok::<_, Error>(kept)
        }
        .await;

        match outcome {
            Ok(kept) => {
                guard.commit().await?;
                tracing::info!("Resolved conflict on ticket {id} with {}", resolution.as_str());
                Ok(kept)
            }
            Err(error) => {
                guard.rollback().await;
                Err(error)
            }
        }
    }

    /// Put one failed ticket, and its failed photos, back in the queue.
    pub async fn retry_failed(&self, id: &TicketId) -> Result<Ticket> {
        let guard = self.store.lock().await;
        let mut ticket = guard
            .get::<Ticket>(&id.as_str())
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        if ticket.sync_status != SyncStatus::Error {
            return Err(Error::InvalidInput(format!(
                "ticket {id} is {}, not failed",
                ticket.sync_status
            )));
        }

        guard.begin().await?;
        let outcome = async {
            requeue(&mut ticket);
            guard.put(&ticket).await?;
            let photos: Vec<Photo> = guard.get_by_index(Index::Parent(*id)).await?;
            for mut photo in photos {
                if photo.sync_status == SyncStatus::Error {
                    photo.sync_status = SyncStatus::Pending;
                    photo.sync.reset();
                    guard.put(&photo).await?;
                }
            }
            Ok::<_, Error>(())
        }
        .await;

        match outcome {
            Ok(()) => {
                guard.commit().await?;
                Ok(ticket)
            }
            Err(error) => {
                guard.rollback().await;
                Err(error)
            }
        }
    }

    /// Put every failed ticket and photo back in the queue.
    pub async fn retry_all_failed(&self) -> Result<usize> {
        let guard = self.store.lock().await;
        guard.begin().await?;
        let outcome = async {
            let mut count = 0;
            let tickets: Vec<Ticket> = guard.get_by_index(Index::SyncStatus(SyncStatus::Error)).await?;
            for mut ticket in tickets {
                requeue(&mut ticket);
                guard.put(&ticket).await?;
                count += 1;
            }
            let photos: Vec<Photo> = guard.get_by_index(Index::SyncStatus(SyncStatus::Error)).await?;
            for mut photo in photos {
                photo.sync_status = SyncStatus::Pending;
                photo.sync.reset();
                guard.put(&photo).await?;
                count += 1;
            }
            Ok::<_, Error>(count)
        }
        .await;

        match outcome {
            Ok(count) => {
                guard.commit().await?;
                Ok(count)
            }
            Err(error) => {
                guard.rollback().await;
                Err(error)
            }
        }
    }
}

fn requeue(ticket: &mut Ticket) {
    ticket.sync_status = SyncStatus::Pending;
    ticket.sync.reset();
}

async fn enter_conflict(
    guard: &StoreGuard<'_>,
    mut ticket: Ticket,
    conflict: TicketConflict,
    report: &mut ReconcileReport,
) -> Result<()> {
    guard.record_conflict(&ticket.id, &conflict).await?;
    tracing::warn!(
        "Ticket {} entered {} conflict",
        ticket.id,
        conflict.kind
    );
    ticket.sync_status = SyncStatus::Conflict;
    ticket.sync.syncing_since = None;
    ticket.conflict = Some(conflict);
    report.conflicts.push(ticket.id);
    guard.put(&ticket).await
}

/// The local ticket a server update refers to, by server id then local id.
async fn find_target(guard: &StoreGuard<'_>, id: &str) -> Result<Option<Ticket>> {
    let by_server: Vec<Ticket> = guard.get_by_index(Index::ServerId(id)).await?;
    if let Some(ticket) = by_server.into_iter().next() {
        return Ok(Some(ticket));
    }
    if id.parse::<TicketId>().is_ok() {
        return guard.get::<Ticket>(id).await;
    }
    Ok(None)
}

async fn apply_server_update(
    guard: &StoreGuard<'_>,
    update: &ServerTicketUpdate,
    sync_ts: DateTime<Utc>,
    report: &mut ReconcileReport,
) -> Result<()> {
    let target = find_target(guard, &update.id).await?;
    match update.action {
        UpdateAction::Update => {
            let Some(data) = update.data.clone() else {
                tracing::warn!("Server update for {} carried no data", update.id);
                return Ok(());
            };
            if let Err(error) = data.validate() {
                tracing::warn!("Skipping invalid server version of {}: {error}", update.id);
                return Ok(());
            }
            apply_server_version(guard, target, &update.id, data, sync_ts, report).await
        }
        UpdateAction::Delete => apply_server_delete(guard, target, sync_ts, report).await,
    }
}

async fn apply_server_version(
    guard: &StoreGuard<'_>,
    target: Option<Ticket>,
    server_id: &str,
    data: TicketPayload,
    sync_ts: DateTime<Utc>,
    report: &mut ReconcileReport,
) -> Result<()> {
    let Some(mut ticket) = target else {
        guard
            .put(&Ticket::from_server(server_id, data, sync_ts))
            .await?;
        report.server_updates_applied += 1;
        return Ok(());
    };

    match ticket.sync_status {
        SyncStatus::Synced => {
            ticket.payload = data;
            ticket.last_synced_at = Some(sync_ts);
            guard.put(&ticket).await?;
            report.server_updates_applied += 1;
        }
        SyncStatus::Pending | SyncStatus::Syncing | SyncStatus::Error => {
            let conflict = TicketConflict {
                kind: ConflictKind::Modified,
                local_payload: ticket.payload.clone(),
                server_payload: Some(data.clone()),
                reason: Some(SERVER_MODIFIED.to_string()),
                detected_at: sync_ts,
            };
            ticket.payload = data;
            enter_conflict(guard, ticket, conflict, report).await?;
            report.server_updates_applied += 1;
        }
        SyncStatus::Conflict => {
            if let Some(conflict) = ticket.conflict.as_mut() {
                conflict.kind = ConflictKind::Modified;
                conflict.server_payload = Some(data.clone());
            }
            ticket.payload = data;
            guard.put(&ticket).await?;
            report.server_updates_applied += 1;
        }
    }
    Ok(())
}

async fn apply_server_delete(
    guard: &StoreGuard<'_>,
    target: Option<Ticket>,
    sync_ts: DateTime<Utc>,
    report: &mut ReconcileReport,
) -> Result<()> {
    let Some(mut ticket) = target else {
        return Ok(());
    };

    match ticket.sync_status {
        SyncStatus::Synced => {
            guard.delete::<Ticket>(&ticket.key()).await?;
            report.server_updates_applied += 1;
        }
        SyncStatus::Pending | SyncStatus::Syncing | SyncStatus::Error => {
            let conflict = TicketConflict {
                kind: ConflictKind::Deleted,
                local_payload: ticket.payload.clone(),
                server_payload: None,
                reason: Some(SERVER_DELETED.to_string()),
                detected_at: sync_ts,
            };
            enter_conflict(guard, ticket, conflict, report).await?;
            report.server_updates_applied += 1;
        }
        SyncStatus::Conflict => {
            if let Some(conflict) = ticket.conflict.as_mut() {
                conflict.kind = ConflictKind::Deleted;
                conflict.server_payload = None;
            }
            guard.put(&ticket).await?;
            report.server_updates_applied += 1;
        }
    }
    Ok(())
}

/// Snapshot records with no result that are still waiting to settle.
///
/// A record that a server update moved to `conflict` counts as settled.
async fn unsettled_without_result(
    guard: &StoreGuard<'_>,
    outbox: &Outbox,
    response: &SyncResponse,
) -> Result<usize> {
    let answered: HashSet<&str> = response
        .results
        .tickets
        .iter()
        .map(|result| result.local_id.as_str())
        .chain(response.results.photos.iter().map(|result| result.local_id.as_str()))
        .collect();

    let mut count = 0;
    for key in outbox.tickets().iter().map(Record::key) {
        if answered.contains(key.as_str()) {
            continue;
        }
        if let Some(ticket) = guard.get::<Ticket>(&key).await? {
            if is_unsettled(ticket.sync_status) {
                count += 1;
            }
        }
    }
    for key in outbox.photos().iter().map(|entry| entry.photo.key()) {
        if answered.contains(key.as_str()) {
            continue;
        }
        if let Some(photo) = guard.get::<Photo>(&key).await? {
            if is_unsettled(photo.sync_status) {
                count += 1;
            }
        }
    }
    Ok(count)
}

const fn is_unsettled(status: SyncStatus) -> bool {
    matches!(status, SyncStatus::Pending | SyncStatus::Syncing)
}

async fn rollback_locked(guard: &StoreGuard<'_>, outbox: &Outbox) -> Result<usize> {
    let mut count = 0;
    for snapshot in outbox.tickets() {
        if let Some(mut ticket) = guard.get::<Ticket>(&snapshot.key()).await? {
            if ticket.sync_status == SyncStatus::Syncing {
                ticket.sync_status = SyncStatus::Pending;
                ticket.sync.syncing_since = None;
                guard.put(&ticket).await?;
                count += 1;
            }
        }
    }
    for entry in outbox.photos() {
        if let Some(mut photo) = guard.get::<Photo>(&entry.photo.key()).await? {
            if photo.sync_status == SyncStatus::Syncing {
                photo.sync_status = SyncStatus::Pending;
                photo.sync.syncing_since = None;
                guard.put(&photo).await?;
                count += 1;
            }
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{fixtures::payload, PhotoKind};
    use crate::sync::outbox::OutboxBuilder;
    use crate::sync::protocol::{ServerUpdates, SyncResults};
    use pretty_assertions::assert_eq;

    const MAX_RETRIES: u32 = 3;

    async fn setup() -> (LocalStore, Reconciler) {
        let store = LocalStore::open_in_memory().await.unwrap();
        let reconciler = Reconciler::new(store.clone(), MAX_RETRIES);
        (store, reconciler)
    }

    async fn snapshot(store: &LocalStore) -> Outbox {
        OutboxBuilder::new(store.clone(), 50, chrono::Duration::minutes(10))
            .build(Utc::now())
            .await
            .unwrap()
    }

    fn sync_ts() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn respond(tickets: Vec<TicketResult>) -> SyncResponse {
        SyncResponse {
            sync_timestamp: sync_ts(),
            results: SyncResults {
                tickets,
                photos: Vec::new(),
            },
            server_updates: ServerUpdates::default(),
        }
    }

    fn ticket_result(ticket: &Ticket, status: ResultStatus, server_id: Option<&str>) -> TicketResult {
        TicketResult {
            local_id: ticket.id.as_str(),
            server_id: server_id.map(ToString::to_string),
            status,
            error: None,
            error_code: None,
        }
    }

    async fn stored(store: &LocalStore, ticket: &Ticket) -> Ticket {
        store.get(&ticket.key()).await.unwrap().unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn success_marks_synced_and_advances_watermark() {
        let (store, reconciler) = setup().await;
        let ticket = Ticket::new_offline(payload("GPS-500001"));
        store.put(&ticket).await.unwrap();
        let outbox = snapshot(&store).await;

        let report = reconciler
            .apply(
                &outbox,
                &respond(vec![ticket_result(&ticket, ResultStatus::Success, Some("S1"))]),
            )
            .await
            .unwrap();

        assert_eq!(report.tickets_synced, 1);
        assert!(report.watermark_advanced);
        let synced = stored(&store, &ticket).await;
        assert_eq!(synced.sync_status, SyncStatus::Synced);
        assert_eq!(synced.server_id.as_deref(), Some("S1"));
        assert_eq!(synced.last_synced_at, Some(sync_ts()));
        assert_eq!(store.watermark().await.unwrap(), Some(sync_ts()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn success_without_server_id_is_an_error() {
        let (store, reconciler) = setup().await;
        let ticket = Ticket::new_offline(payload("GPS-500002"));
        store.put(&ticket).await.unwrap();
        let outbox = snapshot(&store).await;

        reconciler
            .apply(&outbox, &respond(vec![ticket_result(&ticket, ResultStatus::Success, None)]))
            .await
            .unwrap();

        let failed = stored(&store, &ticket).await;
        assert_eq!(failed.sync_status, SyncStatus::Error);
        assert_eq!(failed.sync.last_error.as_deref(), Some(MISSING_SERVER_ID));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_outcome_rolls_back_and_holds_watermark() {
        let (store, reconciler) = setup().await;
        let answered = Ticket::new_offline(payload("GPS-500003"));
        let unanswered = Ticket::new_offline(payload("GPS-500004"));
        store.put(&answered).await.unwrap();
        store.put(&unanswered).await.unwrap();
        let outbox = snapshot(&store).await;

        let report = reconciler
            .apply(
                &outbox,
                &respond(vec![ticket_result(&answered, ResultStatus::Success, Some("S3"))]),
            )
            .await
            .unwrap();

        assert_eq!(report.rolled_back, 1);
        assert!(!report.watermark_advanced);
        assert_eq!(stored(&store, &unanswered).await.sync_status, SyncStatus::Pending);
        assert_eq!(store.watermark().await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn server_delete_without_result_still_advances_watermark() {
        let (store, reconciler) = setup().await;
        let mut ticket = Ticket::from_server("S61", payload("GPS-500061"), sync_ts());
        store.put(&ticket).await.unwrap();
        let mut local = payload("GPS-500061");
        local.notes = Some("officer note".into());
        ticket.apply_local_edit(local).unwrap();
        store.put(&ticket).await.unwrap();
        let outbox = snapshot(&store).await;

        let later = sync_ts() + chrono::Duration::minutes(5);
        let mut response = respond(Vec::new());
        response.sync_timestamp = later;
        response.server_updates.tickets.push(ServerTicketUpdate {
            id: "S61".into(),
            action: UpdateAction::Delete,
            data: None,
        });
        let report = reconciler.apply(&outbox, &response).await.unwrap();

        assert_eq!(report.rolled_back, 0);
        assert!(report.watermark_advanced);
        assert_eq!(stored(&store, &ticket).await.sync_status, SyncStatus::Conflict);
        assert_eq!(store.watermark().await.unwrap(), Some(later));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn replayed_response_keeps_last_success_time() {
        let (store, reconciler) = setup().await;
        let ticket = Ticket::new_offline(payload("GPS-500062"));
        store.put(&ticket).await.unwrap();
        let outbox = snapshot(&store).await;
        let response = respond(vec![ticket_result(&ticket, ResultStatus::Success, Some("S62"))]);

        assert!(reconciler.apply(&outbox, &response).await.unwrap().watermark_advanced);
        let first = store.last_successful_sync().await.unwrap();
        assert!(first.is_some());

        let replay = reconciler.apply(&outbox, &response).await.unwrap();
        assert!(!replay.watermark_advanced);
        assert_eq!(store.last_successful_sync().await.unwrap(), first);
        assert_eq!(store.watermark().await.unwrap(), Some(sync_ts()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rejected_ticket_keeps_local_payload() {
        let (store, reconciler) = setup().await;
        let ticket = Ticket::new_offline(payload("GPS-500005"));
        store.put(&ticket).await.unwrap();
        let outbox = snapshot(&store).await;

        let mut result = ticket_result(&ticket, ResultStatus::Conflict, None);
        result.error = Some("duplicate ticket number".into());
        let report = reconciler.apply(&outbox, &respond(vec![result])).await.unwrap();

        assert_eq!(report.conflicts, vec![ticket.id]);
        let conflicted = stored(&store, &ticket).await;
        assert_eq!(conflicted.sync_status, SyncStatus::Conflict);
        let conflict = conflicted.conflict.unwrap();
        assert_eq!(conflict.kind, ConflictKind::Rejected);
        assert_eq!(conflict.local_payload, ticket.payload);
        assert_eq!(store.list_conflicts(10, false).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn validation_errors_exhaust_retries_immediately() {
        let (store, reconciler) = setup().await;
        let ticket = Ticket::new_offline(payload("GPS-500006"));
        store.put(&ticket).await.unwrap();
        let outbox = snapshot(&store).await;

        let mut result = ticket_result(&ticket, ResultStatus::Error, None);
        result.error = Some("unknown offence code".into());
        result.error_code = Some(ErrorCode::ValidationError);
        reconciler.apply(&outbox, &respond(vec![result])).await.unwrap();

        let failed = stored(&store, &ticket).await;
        assert_eq!(failed.sync_status, SyncStatus::Error);
        assert!(failed.sync.retry_exhausted);
        assert!(snapshot(&store).await.is_empty());

        let retried = reconciler.retry_failed(&ticket.id).await.unwrap();
        assert_eq!(retried.sync_status, SyncStatus::Pending);
        assert_eq!(retried.sync.attempts, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn transient_errors_exhaust_after_max_retries() {
        let (store, reconciler) = setup().await;
        let ticket = Ticket::new_offline(payload("GPS-500007"));
        store.put(&ticket).await.unwrap();

        for _ in 0..MAX_RETRIES {
            let outbox = snapshot(&store).await;
            assert_eq!(outbox.tickets().len(), 1);
            reconciler
                .apply(&outbox, &respond(vec![ticket_result(&ticket, ResultStatus::Error, None)]))
                .await
                .unwrap();
        }

        let failed = stored(&store, &ticket).await;
        assert_eq!(failed.sync.attempts, MAX_RETRIES);
        assert!(failed.sync.retry_exhausted);
        assert!(snapshot(&store).await.is_empty());
        assert_eq!(reconciler.retry_all_failed().await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn success_during_local_edit_only_records_server_id() {
        let (store, reconciler) = setup().await;
        let ticket = Ticket::new_offline(payload("GPS-500008"));
        store.put(&ticket).await.unwrap();
        let outbox = snapshot(&store).await;

        let mut edited = stored(&store, &ticket).await;
        let mut changed = payload("GPS-500008");
        changed.notes = Some("driver disputes speed".into());
        edited.apply_local_edit(changed).unwrap();
        store.put(&edited).await.unwrap();

        reconciler
            .apply(
                &outbox,
                &respond(vec![ticket_result(&ticket, ResultStatus::Success, Some("S8"))]),
            )
            .await
            .unwrap();

        let current = stored(&store, &ticket).await;
        assert_eq!(current.sync_status, SyncStatus::Pending);
        assert_eq!(current.server_id.as_deref(), Some("S8"));
        assert_eq!(current.payload.notes.as_deref(), Some("driver disputes speed"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn photo_syncs_only_with_synced_parent() {
        let (store, reconciler) = setup().await;
        let ticket = Ticket::new_offline(payload("GPS-500009"));
        store.put(&ticket).await.unwrap();
        let photo = Photo::new(ticket.id, PhotoKind::Plate, "image/jpeg", vec![7, 7]).unwrap();
        store.put(&photo).await.unwrap();
        let outbox = snapshot(&store).await;

        let mut response = respond(vec![ticket_result(&ticket, ResultStatus::Error, None)]);
        response.results.photos.push(PhotoResult {
            local_id: photo.id.as_str(),
            server_id: Some("P9".into()),
            status: ResultStatus::Success,
            url: None,
            error: None,
        });
        reconciler.apply(&outbox, &response).await.unwrap();

        let failed: Photo = store.get(&photo.key()).await.unwrap().unwrap();
        assert_eq!(failed.sync_status, SyncStatus::Error);
        assert_eq!(failed.sync.last_error.as_deref(), Some(PARENT_NOT_SYNCED));

        reconciler.retry_failed(&ticket.id).await.unwrap();
        let outbox = snapshot(&store).await;
        let mut response = respond(vec![ticket_result(&ticket, ResultStatus::Success, Some("S9"))]);
        response.results.photos.push(PhotoResult {
            local_id: photo.id.as_str(),
            server_id: Some("P9".into()),
            status: ResultStatus::Success,
            url: Some("https://cdn.example.com/p9.jpg".into()),
            error: None,
        });
        reconciler.apply(&outbox, &response).await.unwrap();

        let synced: Photo = store.get(&photo.key()).await.unwrap().unwrap();
        assert_eq!(synced.sync_status, SyncStatus::Synced);
        assert_eq!(synced.remote_url.as_deref(), Some("https://cdn.example.com/p9.jpg"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn server_update_inserts_unknown_ticket_once() {
        let (store, reconciler) = setup().await;
        let outbox = snapshot(&store).await;

        let mut response = respond(Vec::new());
        response.server_updates.tickets.push(ServerTicketUpdate {
            id: "S50".into(),
            action: UpdateAction::Update,
            data: Some(payload("GPS-500050")),
        });
        reconciler.apply(&outbox, &response).await.unwrap();
        reconciler.apply(&outbox, &response).await.unwrap();

        let tickets: Vec<Ticket> = store.get_all().await.unwrap();
        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0].sync_status, SyncStatus::Synced);
        assert_eq!(tickets[0].server_id.as_deref(), Some("S50"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn server_update_over_pending_edit_conflicts() {
        let (store, reconciler) = setup().await;
        let mut ticket = Ticket::from_server("S60", payload("GPS-500060"), sync_ts());
        store.put(&ticket).await.unwrap();
        let mut local = payload("GPS-500060");
        local.notes = Some("officer note".into());
        ticket.apply_local_edit(local.clone()).unwrap();
        store.put(&ticket).await.unwrap();

        let mut server = payload("GPS-500060");
        server.notes = Some("court note".into());
        let mut response = respond(Vec::new());
        response.server_updates.tickets.push(ServerTicketUpdate {
            id: "S60".into(),
            action: UpdateAction::Update,
            data: Some(server.clone()),
        });
        let outbox = snapshot(&store).await;
        reconciler.apply(&outbox, &response).await.unwrap();

        let conflicted = stored(&store, &ticket).await;
        assert_eq!(conflicted.sync_status, SyncStatus::Conflict);
        assert_eq!(conflicted.payload, server);
        let conflict = conflicted.conflict.unwrap();
        assert_eq!(conflict.kind, ConflictKind::Modified);
        assert_eq!(conflict.local_payload, local);

        let resolved = reconciler
            .resolve_conflict(&ticket.id, ConflictResolution::KeepLocal)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.sync_status, SyncStatus::Pending);
        assert_eq!(resolved.payload, local);
        assert_eq!(resolved.server_id.as_deref(), Some("S60"));
        assert!(store.list_conflicts(10, false).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn server_delete_removes_synced_ticket_and_photos() {
        let (store, reconciler) = setup().await;
        let ticket = Ticket::from_server("S70", payload("GPS-500070"), sync_ts());
        store.put(&ticket).await.unwrap();
        let photo = Photo::new(ticket.id, PhotoKind::Vehicle, "image/jpeg", vec![1]).unwrap();
        store.put(&photo).await.unwrap();

        let mut response = respond(Vec::new());
        response.server_updates.tickets.push(ServerTicketUpdate {
            id: "S70".into(),
            action: UpdateAction::Delete,
            data: None,
        });
        let outbox = Outbox::default();
        reconciler.apply(&outbox, &response).await.unwrap();

        assert!(store.get::<Ticket>(&ticket.key()).await.unwrap().is_none());
        assert!(store.get_all::<Photo>().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn accepting_server_deletion_removes_ticket() {
        let (store, reconciler) = setup().await;
        let mut ticket = Ticket::from_server("S80", payload("GPS-500080"), sync_ts());
        ticket.apply_local_edit(payload("GPS-500080")).unwrap();
        store.put(&ticket).await.unwrap();

        let mut response = respond(Vec::new());
        response.server_updates.tickets.push(ServerTicketUpdate {
            id: "S80".into(),
            action: UpdateAction::Delete,
            data: None,
        });
        reconciler.apply(&Outbox::default(), &response).await.unwrap();
        assert_eq!(stored(&store, &ticket).await.sync_status, SyncStatus::Conflict);

        let removed = reconciler
            .resolve_conflict(&ticket.id, ConflictResolution::AcceptServer)
            .await
            .unwrap();
        assert!(removed.is_none());
        assert!(store.get::<Ticket>(&ticket.key()).await.unwrap().is_none());

        let history = store.list_conflicts(10, true).await.unwrap();
        assert_eq!(history[0].resolution.as_deref(), Some("accept_server"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn accepting_without_server_version_is_rejected() {
        let (store, reconciler) = setup().await;
        let ticket = Ticket::new_offline(payload("GPS-500090"));
        store.put(&ticket).await.unwrap();
        let outbox = snapshot(&store).await;
        reconciler
            .apply(&outbox, &respond(vec![ticket_result(&ticket, ResultStatus::Conflict, None)]))
            .await
            .unwrap();

        let result = reconciler
            .resolve_conflict(&ticket.id, ConflictResolution::AcceptServer)
            .await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert_eq!(stored(&store, &ticket).await.sync_status, SyncStatus::Conflict);

        let mut merged = payload("GPS-500090");
        merged.notes = Some("merged by supervisor".into());
        let resolved = reconciler
            .resolve_conflict(&ticket.id, ConflictResolution::Replace(merged.clone()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.payload, merged);
        assert_eq!(resolved.sync_status, SyncStatus::Pending);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn explicit_rollback_returns_snapshot_to_pending() {
        let (store, reconciler) = setup().await;
        let ticket = Ticket::new_offline(payload("GPS-500100"));
        store.put(&ticket).await.unwrap();
        let outbox = snapshot(&store).await;

        assert_eq!(reconciler.rollback(&outbox).await.unwrap(), 1);
        let pending = stored(&store, &ticket).await;
        assert_eq!(pending.sync_status, SyncStatus::Pending);
        assert_eq!(pending.sync.syncing_since, None);
        assert_eq!(reconciler.rollback(&outbox).await.unwrap(), 0);
    }
}
