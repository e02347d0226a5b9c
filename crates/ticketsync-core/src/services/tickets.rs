//! Offline ticket operations used by hosts.

use chrono::{DateTime, Utc};

use crate::config::SyncSettings;
use crate::db::Index;
use crate::error::{Error, Result};
use crate::models::{
    ConflictResolution, Photo, PhotoKind, SyncConflict, SyncLogEntry, SyncLogKind, SyncStatus,
    Ticket, TicketId, TicketPayload,
};
use crate::sync::Reconciler;

use super::local_store::LocalStore;

/// Tickets issued and edited on the device, queued for sync.
#[derive(Clone)]
pub struct OfflineTickets {
    store: LocalStore,
    reconciler: Reconciler,
}

impl OfflineTickets {
    pub fn new(store: LocalStore, settings: &SyncSettings) -> Self {
        Self {
            reconciler: Reconciler::new(store.clone(), settings.max_record_retries),
            store,
        }
    }

    pub const fn store(&self) -> &LocalStore {
        &self.store
    }

    /// Record a new citation locally; it syncs on the next cycle.
    pub async fn issue_ticket(&self, payload: TicketPayload) -> Result<Ticket> {
        if self.store.is_degraded() {
            return Err(Error::StorageUnavailable(
                "cannot issue tickets while the local store is unavailable".to_string(),
            ));
        }
        payload.validate()?;
        let ticket = Ticket::new_offline(payload);
        self.store.put(&ticket).await?;
        tracing::info!(
            "Issued ticket {} ({}) offline",
            ticket.id,
            ticket.payload.ticket_number
        );
        Ok(ticket)
    }

    /// Replace a ticket's payload with the officer's edit.
    pub async fn edit_ticket(&self, id: &TicketId, payload: TicketPayload) -> Result<Ticket> {
        let guard = self.store.lock().await;
        let mut ticket = guard
            .get::<Ticket>(&id.as_str())
            .await?
            .ok_or_else(|| Error::NotFound(format!("ticket {id}")))?;
        ticket.apply_local_edit(payload)?;
        guard.put(&ticket).await?;
        tracing::debug!("Edited ticket {id}");
        Ok(ticket)
    }

    pub async fn attach_photo(
        &self,
        ticket_id: &TicketId,
        kind: PhotoKind,
        mime_type: &str,
        data: Vec<u8>,
    ) -> Result<Photo> {
        let guard = self.store.lock().await;
        if guard.get::<Ticket>(&ticket_id.as_str()).await?.is_none() {
            return Err(Error::NotFound(format!("ticket {ticket_id}")));
        }
        let photo = Photo::new(*ticket_id, kind, mime_type, data)?;
        guard.put(&photo).await?;
        tracing::debug!("Attached {} photo {} to ticket {ticket_id}", kind, photo.id);
        Ok(photo)
    }

    /// Every ticket on the device, most recently changed first.
    pub async fn local_tickets(&self) -> Result<Vec<Ticket>> {
        let mut tickets: Vec<Ticket> = self.store.get_all().await?;
        tickets.sort_by(|a, b| b.local_updated_at.cmp(&a.local_updated_at));
        Ok(tickets)
    }

    pub async fn tickets_with_status(&self, status: SyncStatus) -> Result<Vec<Ticket>> {
        let mut tickets: Vec<Ticket> = self.store.get_by_index(Index::SyncStatus(status)).await?;
        tickets.sort_by(|a, b| b.local_updated_at.cmp(&a.local_updated_at));
        Ok(tickets)
    }

    pub async fn pending_tickets(&self) -> Result<Vec<Ticket>> {
        self.tickets_with_status(SyncStatus::Pending).await
    }

    pub async fn get_ticket(&self, id: &TicketId) -> Result<Option<Ticket>> {
        self.store.get(&id.as_str()).await
    }

    pub async fn photos_for(&self, ticket_id: &TicketId) -> Result<Vec<Photo>> {
        let mut photos: Vec<Photo> = self.store.get_by_index(Index::Parent(*ticket_id)).await?;
        photos.sort_by(|a, b| a.captured_at.cmp(&b.captured_at));
        Ok(photos)
    }

    /// Tickets and photos the server has not acknowledged
    pub async fn unsynced_count(&self) -> Result<usize> {
        Ok(self.store.sync_counts().await?.unsynced)
    }

    /// Tickets waiting for a conflict decision
    pub async fn conflicts(&self) -> Result<Vec<Ticket>> {
        self.tickets_with_status(SyncStatus::Conflict).await
    }

    pub async fn conflict_history(
        &self,
        limit: usize,
        include_resolved: bool,
    ) -> Result<Vec<SyncConflict>> {
        self.store.list_conflicts(limit, include_resolved).await
    }

    pub async fn resolve_conflict(
        &self,
        id: &TicketId,
        resolution: ConflictResolution,
    ) -> Result<Option<Ticket>> {
        self.reconciler.resolve_conflict(id, resolution).await
    }

    /// Requeue a ticket the server rejected.
    pub async fn retry_failed(&self, id: &TicketId) -> Result<Ticket> {
        let ticket = self.reconciler.retry_failed(id).await?;
        self.store
            .append_log(SyncLogKind::Retry, &format!("ticket {id} requeued"), Some(1), None)
            .await?;
        Ok(ticket)
    }

    /// Requeue everything the server rejected; returns the number of records.
    pub async fn retry_all_failed(&self) -> Result<usize> {
        let count = self.reconciler.retry_all_failed().await?;
        if count > 0 {
            self.store
                .append_log(
                    SyncLogKind::Retry,
                    &format!("{count} failed records requeued"),
                    Some(i64::try_from(count).unwrap_or(i64::MAX)),
                    None,
                )
                .await?;
        }
        Ok(count)
    }

    pub async fn sync_log(&self, limit: usize) -> Result<Vec<SyncLogEntry>> {
        self.store.recent_log(limit).await
    }

    pub async fn last_successful_sync(&self) -> Result<Option<DateTime<Utc>>> {
        self.store.last_successful_sync().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{fixtures::payload, ConflictKind, TicketConflict};
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    async fn tickets() -> OfflineTickets {
        let store = LocalStore::open_in_memory().await.unwrap();
        OfflineTickets::new(store, &SyncSettings::default())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn issued_ticket_is_pending_and_listed() {
        let tickets = tickets().await;
        let issued = tickets.issue_ticket(payload("GPS-500001")).await.unwrap();

        assert_eq!(issued.sync_status, SyncStatus::Pending);
        assert_eq!(issued.server_id, None);
        assert_eq!(tickets.pending_tickets().await.unwrap(), vec![issued.clone()]);
        assert_eq!(tickets.get_ticket(&issued.id).await.unwrap(), Some(issued));
        assert_eq!(tickets.unsynced_count().await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn invalid_payload_is_rejected() {
        let tickets = tickets().await;
        let mut bad = payload("GPS-500002");
        bad.offences.clear();

        let result = tickets.issue_ticket(bad).await;
        assert!(matches!(result, Err(Error::Validation(_))));
        assert!(tickets.local_tickets().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn degraded_store_refuses_new_tickets() {
        let tmp = tempdir().unwrap();
        let blocker = tmp.path().join("blocker");
        std::fs::write(&blocker, b"file").unwrap();
        let store = LocalStore::open_or_degraded(blocker.join("tickets.db"))
            .await
            .unwrap();
        let tickets = OfflineTickets::new(store, &SyncSettings::default());

        let result = tickets.issue_ticket(payload("GPS-500003")).await;
        assert!(result.is_err_and(|error| error.is_storage_unavailable()));
        assert!(tickets.local_tickets().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn edits_are_refused_while_in_conflict() {
        let tickets = tickets().await;
        let mut ticket = tickets.issue_ticket(payload("GPS-500004")).await.unwrap();
        ticket.server_id = Some("S9".to_string());
        ticket.sync_status = SyncStatus::Conflict;
        ticket.conflict = Some(TicketConflict {
            kind: ConflictKind::Deleted,
            local_payload: ticket.payload.clone(),
            server_payload: None,
            reason: None,
            detected_at: Utc::now(),
        });
        tickets.store().put(&ticket).await.unwrap();

        let result = tickets.edit_ticket(&ticket.id, payload("GPS-500005")).await;
        assert!(matches!(result, Err(Error::Conflict(_))));
        assert_eq!(tickets.conflicts().await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn edit_requeues_a_synced_ticket() {
        let tickets = tickets().await;
        let mut ticket = tickets.issue_ticket(payload("GPS-500006")).await.unwrap();
        ticket.server_id = Some("S1".to_string());
        ticket.sync_status = SyncStatus::Synced;
        tickets.store().put(&ticket).await.unwrap();

        let mut changed = payload("GPS-500006");
        changed.notes = Some("driver disputes reading".to_string());
        let edited = tickets.edit_ticket(&ticket.id, changed).await.unwrap();

        assert_eq!(edited.sync_status, SyncStatus::Pending);
        assert_eq!(edited.server_id.as_deref(), Some("S1"));
        assert_eq!(
            edited.payload.notes.as_deref(),
            Some("driver disputes reading")
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn photos_need_an_existing_ticket() {
        let tickets = tickets().await;
        let missing = tickets
            .attach_photo(&TicketId::new(), PhotoKind::Plate, "image/jpeg", vec![1, 2])
            .await;
        assert!(matches!(missing, Err(Error::NotFound(_))));

        let ticket = tickets.issue_ticket(payload("GPS-500007")).await.unwrap();
        let photo = tickets
            .attach_photo(&ticket.id, PhotoKind::Vehicle, "image/png", vec![7; 16])
            .await
            .unwrap();
        assert_eq!(tickets.photos_for(&ticket.id).await.unwrap(), vec![photo]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn retry_requeues_and_logs() {
        let tickets = tickets().await;
        let mut ticket = tickets.issue_ticket(payload("GPS-500008")).await.unwrap();
        ticket.sync_status = SyncStatus::Error;
        ticket.sync.attempts = 5;
        ticket.sync.last_error = Some("rejected".to_string());
        tickets.store().put(&ticket).await.unwrap();

        let retried = tickets.retry_failed(&ticket.id).await.unwrap();
        assert_eq!(retried.sync_status, SyncStatus::Pending);
        assert_eq!(retried.sync.attempts, 0);

        let log = tickets.sync_log(10).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].kind, SyncLogKind::Retry);

        assert_eq!(tickets.retry_all_failed().await.unwrap(), 0);
        assert_eq!(tickets.sync_log(10).await.unwrap().len(), 1);
    }
}
