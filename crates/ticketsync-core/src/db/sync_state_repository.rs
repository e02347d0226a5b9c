//! Sync watermark repository

use chrono::{DateTime, Utc};
use libsql::Connection;

use crate::error::{Error, Result};

const WATERMARK_KEY: &str = "last_sync_timestamp";
const LAST_SUCCESS_KEY: &str = "last_successful_sync_at";

/// Trait for sync bookkeeping that survives restarts (async)
#[allow(async_fn_in_trait)]
pub trait SyncStateRepository {
    /// Server timestamp of the last fully reconciled cycle
    async fn watermark(&self) -> Result<Option<DateTime<Utc>>>;

    /// Advance the watermark together with the local success time.
    ///
    /// Runs inside the caller's transaction.
    async fn advance_watermark(
        &self,
        watermark: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Local time of the last fully reconciled cycle
    async fn last_successful_sync(&self) -> Result<Option<DateTime<Utc>>>;
}

/// libSQL implementation of `SyncStateRepository`
pub struct LibSqlSyncStateRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlSyncStateRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl SyncStateRepository for LibSqlSyncStateRepository<'_> {
    async fn watermark(&self) -> Result<Option<DateTime<Utc>>> {
        self.get_timestamp(WATERMARK_KEY).await
    }

    async fn advance_watermark(
        &self,
        watermark: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Result<()> {
        self.set_value(WATERMARK_KEY, &watermark.to_rfc3339()).await?;
        self.set_value(LAST_SUCCESS_KEY, &completed_at.to_rfc3339())
            .await
    }

    async fn last_successful_sync(&self) -> Result<Option<DateTime<Utc>>> {
        self.get_timestamp(LAST_SUCCESS_KEY).await
    }
}

impl LibSqlSyncStateRepository<'_> {
    async fn get_timestamp(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        let Some(value) = self.get_value(key).await? else {
            return Ok(None);
        };
        DateTime::parse_from_rfc3339(&value)
            .map(|timestamp| Some(timestamp.with_timezone(&Utc)))
            .map_err(|error| Error::Database(format!("invalid {key} value '{value}': {error}")))
    }

    async fn get_value(&self, key: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query("SELECT value FROM sync_state WHERE key = ?", [key])
            .await?;

        if let Some(row) = rows.next().await? {
            let value: String = row.get(0)?;
            Ok(Some(value))
        } else {
            Ok(None)
        }
    }

    async fn set_value(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO sync_state (key, value) VALUES (?, ?)",
                [key, value],
            )
            .await?;
        Ok(())
    }
}
