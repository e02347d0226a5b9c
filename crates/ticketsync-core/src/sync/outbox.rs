//! Outbox snapshots of unsynced records.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};

use crate::db::{Index, Record};
use crate::error::Result;
use crate::models::{Photo, SyncMeta, SyncStatus, Ticket, TicketId};
use crate::services::{LocalStore, StoreGuard};
use crate::util::unix_epoch;

use super::protocol::{PhotoUpload, SyncRequest, TicketChange};

/// A photo captured into a snapshot, with the parent id the server will see
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxPhoto {
    pub photo: Photo,
    pub wire_ticket_id: String,
}

/// Immutable set of records handed to one sync cycle.
///
/// Every record in it was marked `syncing` when the snapshot was taken.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outbox {
    tickets: Vec<Ticket>,
    photos: Vec<OutboxPhoto>,
    has_more: bool,
    built_at: DateTime<Utc>,
}

impl Outbox {
    pub fn tickets(&self) -> &[Ticket] {
        &self.tickets
    }

    pub fn photos(&self) -> &[OutboxPhoto] {
        &self.photos
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty() && self.photos.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tickets.len() + self.photos.len()
    }

    /// Eligible records were left out by the batch cap
    pub const fn has_more(&self) -> bool {
        self.has_more
    }

    pub const fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    /// Wire request for this snapshot; no watermark means a full pull.
    pub fn to_request(&self, watermark: Option<DateTime<Utc>>) -> SyncRequest {
        SyncRequest {
            last_sync_timestamp: watermark.unwrap_or_else(unix_epoch),
            tickets: self
                .tickets
                .iter()
                .map(|ticket| TicketChange {
                    id: ticket.id.as_str(),
                    server_id: ticket.server_id.clone(),
                    action: ticket.action(),
                    data: ticket.payload.clone(),
                    timestamp: ticket.local_updated_at,
                })
                .collect(),
            photos: self
                .photos
                .iter()
                .map(|entry| PhotoUpload {
                    ticket_id: entry.wire_ticket_id.clone(),
                    photo_id: entry.photo.id.as_str(),
                    data: BASE64.encode(&entry.photo.data),
                    kind: entry.photo.kind,
                    mime_type: entry.photo.mime_type.clone(),
                })
                .collect(),
        }
    }
}

/// Builds outbox snapshots from the local store
#[derive(Clone)]
pub struct OutboxBuilder {
    store: LocalStore,
    batch_size: usize,
    stale_after: Duration,
}

impl OutboxBuilder {
    pub const fn new(store: LocalStore, batch_size: usize, stale_after: Duration) -> Self {
        Self {
            store,
            batch_size,
            stale_after,
        }
    }

    /// Snapshot eligible records and mark them `syncing`.
    pub async fn build(&self, now: DateTime<Utc>) -> Result<Outbox> {
        let stale_before = now - self.stale_after;
        let guard = self.store.lock().await;

        let mut tickets: Vec<Ticket> = eligible(&guard, stale_before).await?;
        tickets.sort_by(|a, b| {
            a.local_updated_at
                .cmp(&b.local_updated_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        let mut has_more = tickets.len() > self.batch_size;
        tickets.truncate(self.batch_size);

        let snapshot: HashMap<TicketId, Option<String>> = tickets
            .iter()
            .map(|ticket| (ticket.id, ticket.server_id.clone()))
            .collect();

        let mut photos = Vec::new();
        let candidates: Vec<Photo> = eligible(&guard, stale_before).await?;
        for photo in candidates {
            let wire_ticket_id = match snapshot.get(&photo.ticket_id) {
                Some(server_id) => server_id.clone().unwrap_or_else(|| photo.ticket_id.as_str()),
                None => {
                    let parent = guard.get::<Ticket>(&photo.ticket_id.as_str()).await?;
                    match parent.and_then(|parent| parent.server_id) {
                        Some(server_id) => server_id,
                        None => continue,
                    }
                }
            };
            if photos.len() == self.batch_size {
                has_more = true;
                break;
            }
            photos.push(OutboxPhoto {
                photo,
                wire_ticket_id,
            });
        }

        if tickets.is_empty() && photos.is_empty() {
            return Ok(Outbox {
                tickets,
                photos,
                has_more,
                built_at: now,
            });
        }

        guard.begin().await?;
        if let Err(error) = mark_syncing(&guard, &mut tickets, &mut photos, now).await {
            guard.rollback().await;
            return Err(error);
        }
        guard.commit().await?;

        tracing::debug!(
            "Outbox captured {} tickets and {} photos (more pending: {has_more})",
            tickets.len(),
            photos.len()
        );

        Ok(Outbox {
            tickets,
            photos,
            has_more,
            built_at: now,
        })
    }
}

/// Records that carry sync bookkeeping
trait Outgoing: Record {
    fn status(&self) -> SyncStatus;
    fn meta(&self) -> &SyncMeta;
}

impl Outgoing for Ticket {
    fn status(&self) -> SyncStatus {
        self.sync_status
    }

    fn meta(&self) -> &SyncMeta {
        &self.sync
    }
}

impl Outgoing for Photo {
    fn status(&self) -> SyncStatus {
        self.sync_status
    }

    fn meta(&self) -> &SyncMeta {
        &self.sync
    }
}

async fn eligible<R: Outgoing>(
    guard: &StoreGuard<'_>,
    stale_before: DateTime<Utc>,
) -> Result<Vec<R>> {
    let mut records = Vec::new();
    for status in [SyncStatus::Pending, SyncStatus::Error, SyncStatus::Syncing] {
        let found: Vec<R> = guard.get_by_index(Index::SyncStatus(status)).await?;
        records.extend(
            found
                .into_iter()
                .filter(|record| record.meta().outbox_eligible(record.status(), stale_before)),
        );
    }
    Ok(records)
}

async fn mark_syncing(
    guard: &StoreGuard<'_>,
    tickets: &mut [Ticket],
    photos: &mut [OutboxPhoto],
    now: DateTime<Utc>,
) -> Result<()> {
    for ticket in tickets.iter_mut() {
        ticket.sync_status = SyncStatus::Syncing;
        ticket.sync.syncing_since = Some(now);
        guard.put(&*ticket).await?;
    }
    for entry in photos.iter_mut() {
        entry.photo.sync_status = SyncStatus::Syncing;
        entry.photo.sync.syncing_since = Some(now);
        guard.put(&entry.photo).await?;
    }
    Ok(())
}
