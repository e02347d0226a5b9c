//! One sync cycle: snapshot, exchange, reconcile.

use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

use crate::config::SyncSettings;
use crate::error::Error;
use crate::models::SyncLogKind;
use crate::services::LocalStore;

use super::outbox::{Outbox, OutboxBuilder};
use super::reconcile::{ReconcileReport, Reconciler};
use super::transport::{exchange_with_retry, RetryPolicy, SyncTransport, TransportError};

/// Failures that abort a whole cycle
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Storage(#[from] Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl SyncError {
    pub const fn is_storage_unavailable(&self) -> bool {
        matches!(self, Self::Storage(error) if error.is_storage_unavailable())
    }
}

/// What a cycle should do beyond pushing local changes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleRequest {
    /// Exchange even with an empty outbox to pick up server changes
    pub pull_server_updates: bool,
}

impl CycleRequest {
    pub const PUSH: Self = Self {
        pull_server_updates: false,
    };
    pub const PULL: Self = Self {
        pull_server_updates: true,
    };
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Whether the server was contacted at all
    pub exchanged: bool,
    pub tickets_sent: usize,
    pub photos_sent: usize,
    pub reconcile: ReconcileReport,
    /// Eligible records were left for a follow-up cycle
    pub has_more: bool,
    pub duration_ms: u64,
}

/// Drives sync cycles against one store and one transport
pub struct SyncEngine<T> {
    store: LocalStore,
    transport: T,
    outbox: OutboxBuilder,
    reconciler: Reconciler,
    retry: RetryPolicy,
}

impl<T: SyncTransport> SyncEngine<T> {
    pub fn new(store: LocalStore, transport: T, settings: &SyncSettings) -> Self {
        Self {
            outbox: OutboxBuilder::new(
                store.clone(),
                settings.batch_size,
                settings.stale_syncing_after(),
            ),
            reconciler: Reconciler::new(store.clone(), settings.max_record_retries),
            retry: settings.retry_policy(),
            store,
            transport,
        }
    }

    pub const fn store(&self) -> &LocalStore {
        &self.store
    }

    pub const fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Run one full cycle.
    pub async fn run_cycle(&self, request: CycleRequest) -> Result<CycleReport, SyncError> {
        if self.store.is_degraded() {
            return Err(SyncError::Storage(Error::StorageUnavailable(
                "sync is disabled while the local store is unavailable".to_string(),
            )));
        }

        let started = Instant::now();
        let watermark = self.store.watermark().await?;
        let outbox = self.outbox.build(Utc::now()).await?;

        if outbox.is_empty() && !request.pull_server_updates {
            tracing::debug!("Nothing to sync");
            return Ok(CycleReport::default());
        }

        let item_count = count(outbox.len());
        tracing::info!(
            "Sync cycle started with {} tickets and {} photos",
            outbox.tickets().len(),
            outbox.photos().len()
        );
        if let Err(error) = self
            .store
            .append_log(
                SyncLogKind::SyncStart,
                &format!(
                    "sending {} tickets, {} photos",
                    outbox.tickets().len(),
                    outbox.photos().len()
                ),
                Some(item_count),
                None,
            )
            .await
        {
            self.abort(&outbox, &error.to_string(), started).await;
            return Err(SyncError::Storage(error));
        }

        let wire = outbox.to_request(watermark);
        let response = match exchange_with_retry(&self.transport, &wire, &self.retry).await {
            Ok(response) => response,
            Err(error) => {
                self.abort(&outbox, &error.to_string(), started).await;
                return Err(SyncError::Transport(error));
            }
        };

        let reconcile = match self.reconciler.apply(&outbox, &response).await {
            Ok(report) => report,
            Err(error) => {
                self.abort(&outbox, &error.to_string(), started).await;
                return Err(SyncError::Storage(error));
            }
        };

        let duration_ms = elapsed_ms(started);
        self.log_outcome(&reconcile, item_count, duration_ms).await;
        tracing::info!(
            "Sync cycle finished in {duration_ms} ms: {} tickets synced, {} conflicts",
            reconcile.tickets_synced,
            reconcile.conflicts.len()
        );

        Ok(CycleReport {
            exchanged: true,
            tickets_sent: outbox.tickets().len(),
            photos_sent: outbox.photos().len(),
            reconcile,
            has_more: outbox.has_more(),
            duration_ms,
        })
    }

    /// Record a committed cycle; log failures cannot undo it.
    async fn log_outcome(&self, reconcile: &ReconcileReport, item_count: i64, duration_ms: u64) {
        for ticket_id in &reconcile.conflicts {
            if let Err(error) = self
                .store
                .append_log(
                    SyncLogKind::Conflict,
                    &format!("ticket {ticket_id} needs resolution"),
                    None,
                    None,
                )
                .await
            {
                tracing::warn!("Failed to log conflict for ticket {ticket_id}: {error}");
            }
        }
        if let Err(error) = self
            .store
            .append_log(
                SyncLogKind::SyncComplete,
                &format!(
                    "{} synced, {} failed, {} conflicts, {} server updates",
                    reconcile.tickets_synced + reconcile.photos_synced,
                    reconcile.tickets_failed + reconcile.photos_failed,
                    reconcile.conflicts.len(),
                    reconcile.server_updates_applied
                ),
                Some(item_count),
                Some(i64::try_from(duration_ms).unwrap_or(i64::MAX)),
            )
            .await
        {
            tracing::warn!("Failed to write sync log: {error}");
        }
    }

    /// Return the snapshot to `pending` and record the failure.
    async fn abort(&self, outbox: &Outbox, reason: &str, started: Instant) {
        match self.reconciler.rollback(outbox).await {
            Ok(count) => tracing::warn!("Sync cycle failed: {reason}; {count} records rolled back"),
            Err(error) => tracing::error!("Sync cycle failed: {reason}; rollback failed: {error}"),
        }
        let duration_ms = i64::try_from(elapsed_ms(started)).unwrap_or(i64::MAX);
        if let Err(error) = self
            .store
            .append_log(
                SyncLogKind::SyncError,
                reason,
                Some(count(outbox.len())),
                Some(duration_ms),
            )
            .await
        {
            tracing::error!("Failed to write sync log: {error}");
        }
    }
}

fn count(len: usize) -> i64 {
    i64::try_from(len).unwrap_or(i64::MAX)
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
