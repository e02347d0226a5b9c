//! Shared local store handle used by the sync engine and hosts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};

use crate::db::{
    AuditRepository, Database, Index, LibSqlAuditRepository, LibSqlRecordRepository,
    LibSqlSyncStateRepository, Record, RecordRepository, SyncStateRepository,
};
use crate::error::{Error, Result};
use crate::models::{
    Photo, SyncConflict, SyncLogEntry, SyncLogKind, SyncStatus, Ticket, TicketConflict, TicketId,
};

/// Records not yet acknowledged by the server, by kind of trouble
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncCounts {
    pub unsynced: usize,
    pub conflicts: usize,
    pub failed: usize,
}

/// Thread-safe handle over the device's record store.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
    degraded: bool,
}

impl LocalStore {
    /// Open the store at the given filesystem path.
    ///
    /// Any failure to create, open or migrate the file is reported as
    /// `Error::StorageUnavailable`.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        let db = Self::open_file(&db_path)
            .await
            .map_err(|error| Error::StorageUnavailable(format!("{}: {error}", db_path.display())))?;
        tracing::info!("Opened local store at {}", db_path.display());
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
            degraded: false,
        })
    }

    /// Open the store, falling back to a read-only in-memory store.
    ///
    /// The fallback keeps the host usable for reads; every write fails with
    /// `Error::StorageUnavailable` and sync cycles refuse to run.
    pub async fn open_or_degraded(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        match Self::open_path(db_path.clone()).await {
            Ok(store) => Ok(store),
            Err(error) => {
                tracing::error!("Local store unavailable, continuing degraded: {error}");
                let db = Database::open_in_memory().await?;
                Ok(Self {
                    db: Arc::new(Mutex::new(db)),
                    db_path: Some(db_path),
                    degraded: true,
                })
            }
        }
    }

    /// Open an in-memory store (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
            degraded: false,
        })
    }

    async fn open_file(db_path: &Path) -> Result<Database> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Database::open(db_path).await
    }

    /// Whether writes are refused because persistence failed to open
    pub const fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Exclusive access for multi-step read-modify-write sequences.
    pub async fn lock(&self) -> StoreGuard<'_> {
        StoreGuard {
            db: self.db.lock().await,
            degraded: self.degraded,
        }
    }

    /// All records of a store.
    pub async fn get_all<R: Record>(&self) -> Result<Vec<R>> {
        self.lock().await.get_all().await
    }

    /// Fetch a record by local id.
    pub async fn get<R: Record>(&self, key: &str) -> Result<Option<R>> {
        self.lock().await.get(key).await
    }

    /// Records matching a secondary index.
    pub async fn get_by_index<R: Record>(&self, index: Index<'_>) -> Result<Vec<R>> {
        self.lock().await.get_by_index(index).await
    }

    /// Validate and write a whole record.
    pub async fn put<R: Record>(&self, record: &R) -> Result<()> {
        self.lock().await.put(record).await
    }

    /// Delete a record by local id.
    pub async fn delete<R: Record>(&self, key: &str) -> Result<bool> {
        self.lock().await.delete::<R>(key).await
    }

    pub async fn count_by_status<R: Record>(&self, status: SyncStatus) -> Result<usize> {
        self.lock().await.count_by_status::<R>(status).await
    }

    pub async fn watermark(&self) -> Result<Option<DateTime<Utc>>> {
        self.lock().await.watermark().await
    }

    /// Outstanding work across tickets and photos.
    pub async fn sync_counts(&self) -> Result<SyncCounts> {
        let guard = self.lock().await;
        let mut counts = SyncCounts::default();
        for status in SyncStatus::ALL {
            let total = guard.count_by_status::<Ticket>(status).await?
                + guard.count_by_status::<Photo>(status).await?;
            if status.is_unsynced() {
                counts.unsynced += total;
            }
            match status {
                SyncStatus::Conflict => counts.conflicts += total,
                SyncStatus::Error => counts.failed += total,
                _ => {}
            }
        }
        Ok(counts)
    }

    pub async fn last_successful_sync(&self) -> Result<Option<DateTime<Utc>>> {
        self.lock().await.last_successful_sync().await
    }

    pub async fn list_conflicts(
        &self,
        limit: usize,
        include_resolved: bool,
    ) -> Result<Vec<SyncConflict>> {
        self.lock().await.list_conflicts(limit, include_resolved).await
    }

    pub async fn append_log(
        &self,
        kind: SyncLogKind,
        details: &str,
        item_count: Option<i64>,
        duration_ms: Option<i64>,
    ) -> Result<()> {
        self.lock()
            .await
            .append_log(kind, details, item_count, duration_ms)
            .await
    }

    pub async fn recent_log(&self, limit: usize) -> Result<Vec<SyncLogEntry>> {
        self.lock().await.recent_log(limit).await
    }
}

/// Locked view of the store; writes are refused while degraded.
pub struct StoreGuard<'a> {
    db: MutexGuard<'a, Database>,
    degraded: bool,
}

impl StoreGuard<'_> {
    fn records(&self) -> LibSqlRecordRepository<'_> {
        LibSqlRecordRepository::new(self.db.connection())
    }

    fn sync_state(&self) -> LibSqlSyncStateRepository<'_> {
        LibSqlSyncStateRepository::new(self.db.connection())
    }

    fn audit(&self) -> LibSqlAuditRepository<'_> {
        LibSqlAuditRepository::new(self.db.connection())
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.degraded {
            Err(Error::StorageUnavailable(
                "local store is read-only".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    /// Start a transaction covering the following writes.
    pub async fn begin(&self) -> Result<()> {
        self.ensure_writable()?;
        self.db.connection().execute("BEGIN TRANSACTION", ()).await?;
        Ok(())
    }

    pub async fn commit(&self) -> Result<()> {
        self.db.connection().execute("COMMIT", ()).await?;
        Ok(())
    }

    /// Abandon the open transaction; failures are logged, not returned.
    pub async fn rollback(&self) {
        if let Err(error) = self.db.connection().execute("ROLLBACK", ()).await {
            tracing::warn!("Rollback failed: {error}");
        }
    }

    pub async fn get_all<R: Record>(&self) -> Result<Vec<R>> {
        self.records().get_all().await
    }

    pub async fn get<R: Record>(&self, key: &str) -> Result<Option<R>> {
        self.records().get(key).await
    }

    pub async fn get_by_index<R: Record>(&self, index: Index<'_>) -> Result<Vec<R>> {
        self.records().get_by_index(index).await
    }

    pub async fn put<R: Record>(&self, record: &R) -> Result<()> {
        self.ensure_writable()?;
        self.records().put(record).await
    }

    pub async fn delete<R: Record>(&self, key: &str) -> Result<bool> {
        self.ensure_writable()?;
        self.records().delete::<R>(key).await
    }

    pub async fn count_by_status<R: Record>(&self, status: SyncStatus) -> Result<usize> {
        self.records().count_by_status::<R>(status).await
    }

    pub async fn watermark(&self) -> Result<Option<DateTime<Utc>>> {
        self.sync_state().watermark().await
    }

    pub async fn advance_watermark(
        &self,
        watermark: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Result<()> {
        self.ensure_writable()?;
        self.sync_state()
            .advance_watermark(watermark, completed_at)
            .await
    }

    pub async fn last_successful_sync(&self) -> Result<Option<DateTime<Utc>>> {
        self.sync_state().last_successful_sync().await
    }

    pub async fn record_conflict(
        &self,
        ticket_id: &TicketId,
        conflict: &TicketConflict,
    ) -> Result<i64> {
        self.ensure_writable()?;
        self.audit().record_conflict(ticket_id, conflict).await
    }

    pub async fn mark_resolved(
        &self,
        ticket_id: &TicketId,
        resolution: &str,
        resolved_at: DateTime<Utc>,
    ) -> Result<usize> {
        self.ensure_writable()?;
        self.audit()
            .mark_resolved(ticket_id, resolution, resolved_at)
            .await
    }

    pub async fn list_conflicts(
        &self,
        limit: usize,
        include_resolved: bool,
    ) -> Result<Vec<SyncConflict>> {
        self.audit().list_conflicts(limit, include_resolved).await
    }

    pub async fn append_log(
        &self,
        kind: SyncLogKind,
        details: &str,
        item_count: Option<i64>,
        duration_ms: Option<i64>,
    ) -> Result<()> {
        self.ensure_writable()?;
        self.audit()
            .append_log(kind, details, item_count, duration_ms)
            .await
    }

    pub async fn recent_log(&self, limit: usize) -> Result<Vec<SyncLogEntry>> {
        self.audit().recent_log(limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::payload;
    use tempfile::tempdir;

    #[tokio::test(flavor = "multi_thread")]
    async fn in_memory_put_and_list_roundtrip() {
        let store = LocalStore::open_in_memory().await.unwrap();

        let ticket = Ticket::new_offline(payload("GPS-300001"));
        store.put(&ticket).await.unwrap();

        let tickets: Vec<Ticket> = store.get_all().await.unwrap();
        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0].payload.ticket_number, "GPS-300001");
        assert!(!store.is_degraded());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn open_path_creates_parent_directories() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("nested").join("tickets.db");

        let store = LocalStore::open_path(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(store.path(), Some(path.as_path()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unopenable_path_is_storage_unavailable() {
        let tmp = tempdir().unwrap();
        let blocker = tmp.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let result = LocalStore::open_path(blocker.join("tickets.db")).await;
        assert!(matches!(result, Err(Error::StorageUnavailable(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn degraded_store_reads_but_refuses_writes() {
        let tmp = tempdir().unwrap();
        let blocker = tmp.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let store = LocalStore::open_or_degraded(blocker.join("tickets.db"))
            .await
            .unwrap();
        assert!(store.is_degraded());

        assert!(store.get_all::<Ticket>().await.unwrap().is_empty());
        let result = store.put(&Ticket::new_offline(payload("GPS-300002"))).await;
        assert!(result.is_err_and(|error| error.is_storage_unavailable()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sync_counts_cover_tickets_and_photos() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let ticket = Ticket::new_offline(payload("GPS-300010"));
        store.put(&ticket).await.unwrap();
        let photo = Photo::new(ticket.id, crate::models::PhotoKind::Plate, "image/jpeg", vec![1])
            .unwrap();
        store.put(&photo).await.unwrap();

        let counts = store.sync_counts().await.unwrap();
        assert_eq!(
            counts,
            SyncCounts {
                unsynced: 2,
                conflicts: 0,
                failed: 0,
            }
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rolled_back_transaction_discards_writes() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let guard = store.lock().await;

        guard.begin().await.unwrap();
        guard
            .put(&Ticket::new_offline(payload("GPS-300003")))
            .await
            .unwrap();
        guard.rollback().await;

        assert!(guard.get_all::<Ticket>().await.unwrap().is_empty());
    }
}
