//! Keyed record stores with secondary indexes
//!
//! Every store is a table holding the indexed columns (`server_id`,
//! `sync_status`, `parent_id`, `updated_at`) next to the full record as JSON.
//! Writes replace the whole record; callers read-modify-write.

use libsql::{Connection, Value};

use crate::error::{Error, Result};
use crate::models::{Photo, SyncStatus, Ticket, TicketId};

const SELECT_COLUMNS: &str = "id, server_id, sync_status, parent_id, updated_at, body, blob";

/// Named local stores
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Store {
    Tickets,
    Photos,
}

impl Store {
    pub const fn table(self) -> &'static str {
        match self {
            Self::Tickets => "tickets",
            Self::Photos => "photos",
        }
    }
}

/// Secondary index lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Index<'a> {
    SyncStatus(SyncStatus),
    ServerId(&'a str),
    /// Photos of one ticket
    Parent(TicketId),
}

impl Index<'_> {
    const fn column(&self) -> &'static str {
        match self {
            Self::SyncStatus(_) => "sync_status",
            Self::ServerId(_) => "server_id",
            Self::Parent(_) => "parent_id",
        }
    }

    fn value(&self) -> Value {
        match self {
            Self::SyncStatus(status) => Value::Text(status.as_str().to_string()),
            Self::ServerId(server_id) => Value::Text((*server_id).to_string()),
            Self::Parent(ticket_id) => Value::Text(ticket_id.as_str()),
        }
    }
}

/// Flattened row shared by all stores
#[derive(Debug, Clone, PartialEq)]
pub struct RecordRow {
    pub id: String,
    pub server_id: Option<String>,
    pub sync_status: SyncStatus,
    pub parent_id: Option<String>,
    pub updated_at: i64,
    pub body: String,
    pub blob: Option<Vec<u8>>,
}

/// A domain record that can live in a local store
pub trait Record: Sized + Send + Sync {
    const STORE: Store;

    fn key(&self) -> String;

    /// Invariants checked before every write
    fn check_invariants(&self) -> Result<()>;

    fn to_row(&self) -> Result<RecordRow>;

    fn from_row(row: RecordRow) -> Result<Self>;
}

impl Record for Ticket {
    const STORE: Store = Store::Tickets;

    fn key(&self) -> String {
        self.id.as_str()
    }

    fn check_invariants(&self) -> Result<()> {
        self.validate()
    }

    fn to_row(&self) -> Result<RecordRow> {
        Ok(RecordRow {
            id: self.id.as_str(),
            server_id: self.server_id.clone(),
            sync_status: self.sync_status,
            parent_id: None,
            updated_at: self.local_updated_at.timestamp_millis(),
            body: serde_json::to_string(self)?,
            blob: None,
        })
    }

    fn from_row(row: RecordRow) -> Result<Self> {
        Ok(serde_json::from_str(&row.body)?)
    }
}

impl Record for Photo {
    const STORE: Store = Store::Photos;

    fn key(&self) -> String {
        self.id.as_str()
    }

    fn check_invariants(&self) -> Result<()> {
        self.validate()
    }

    fn to_row(&self) -> Result<RecordRow> {
        Ok(RecordRow {
            id: self.id.as_str(),
            server_id: self.server_id.clone(),
            sync_status: self.sync_status,
            parent_id: Some(self.ticket_id.as_str()),
            updated_at: self.captured_at.timestamp_millis(),
            body: serde_json::to_string(self)?,
            blob: Some(self.data.clone()),
        })
    }

    fn from_row(row: RecordRow) -> Result<Self> {
        let mut photo: Self = serde_json::from_str(&row.body)?;
        photo.data = row.blob.unwrap_or_default();
        Ok(photo)
    }
}

/// Trait for record storage operations (async)
#[allow(async_fn_in_trait)]
pub trait RecordRepository {
    /// All records of a store, in storage order
    async fn get_all<R: Record>(&self) -> Result<Vec<R>>;

    /// One record by its local key
    async fn get<R: Record>(&self, key: &str) -> Result<Option<R>>;

    /// Records whose indexed field equals the lookup value
    async fn get_by_index<R: Record>(&self, index: Index<'_>) -> Result<Vec<R>>;

    /// Validate, then insert or overwrite by key
    async fn put<R: Record>(&self, record: &R) -> Result<()>;

    /// Delete by key; returns whether a row existed
    async fn delete<R: Record>(&self, key: &str) -> Result<bool>;

    /// Number of records in the given sync status
    async fn count_by_status<R: Record>(&self, status: SyncStatus) -> Result<usize>;
}

/// libSQL implementation of `RecordRepository`
pub struct LibSqlRecordRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlRecordRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    async fn query_rows(&self, sql: &str, params: Vec<Value>) -> Result<Vec<RecordRow>> {
        let mut rows = self
            .conn
            .query(sql, libsql::params_from_iter(params))
            .await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(parse_row(&row)?);
        }
        Ok(records)
    }
}

fn optional_text(value: Value) -> Option<String> {
    match value {
        Value::Text(text) => Some(text),
        _ => None,
    }
}

fn parse_row(row: &libsql::Row) -> Result<RecordRow> {
    let status: String = row.get(2)?;
    let sync_status = status
        .parse()
        .map_err(Error::Database)?;
    let blob = match row.get_value(6)? {
        Value::Blob(bytes) => Some(bytes),
        _ => None,
    };

    Ok(RecordRow {
        id: row.get(0)?,
        server_id: optional_text(row.get_value(1)?),
        sync_status,
        parent_id: optional_text(row.get_value(3)?),
        updated_at: row.get(4)?,
        body: row.get(5)?,
        blob,
    })
}

fn text_or_null(value: Option<String>) -> Value {
    value.map_or(Value::Null, Value::Text)
}

impl RecordRepository for LibSqlRecordRepository<'_> {
    async fn get_all<R: Record>(&self) -> Result<Vec<R>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM {} ORDER BY updated_at ASC, id ASC",
            R::STORE.table()
        );
        self.query_rows(&sql, Vec::new())
            .await?
            .into_iter()
            .map(R::from_row)
            .collect()
    }

    async fn get<R: Record>(&self, key: &str) -> Result<Option<R>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM {} WHERE id = ?",
            R::STORE.table()
        );
        self.query_rows(&sql, vec![Value::Text(key.to_string())])
            .await?
            .into_iter()
            .next()
            .map(R::from_row)
            .transpose()
    }

    async fn get_by_index<R: Record>(&self, index: Index<'_>) -> Result<Vec<R>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM {} WHERE {} = ? ORDER BY updated_at ASC, id ASC",
            R::STORE.table(),
            index.column()
        );
        self.query_rows(&sql, vec![index.value()])
            .await?
            .into_iter()
            .map(R::from_row)
            .collect()
    }

    async fn put<R: Record>(&self, record: &R) -> Result<()> {
        record.check_invariants()?;
        let row = record.to_row()?;

        // Upsert rather than REPLACE: REPLACE deletes first, which would
        // cascade to a ticket's photos.
        let sql = format!(
            "INSERT INTO {} (id, server_id, sync_status, parent_id, updated_at, body, blob)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                server_id = excluded.server_id,
                sync_status = excluded.sync_status,
                parent_id = excluded.parent_id,
                updated_at = excluded.updated_at,
                body = excluded.body,
                blob = excluded.blob",
            R::STORE.table()
        );

        self.conn
            .execute(
                &sql,
                libsql::params_from_iter([
                    Value::Text(row.id),
                    text_or_null(row.server_id),
                    Value::Text(row.sync_status.as_str().to_string()),
                    text_or_null(row.parent_id),
                    Value::Integer(row.updated_at),
                    Value::Text(row.body),
                    row.blob.map_or(Value::Null, Value::Blob),
                ]),
            )
            .await?;
        Ok(())
    }

    async fn delete<R: Record>(&self, key: &str) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE id = ?", R::STORE.table());
        let rows = self.conn.execute(&sql, [key]).await?;
        Ok(rows > 0)
    }

    async fn count_by_status<R: Record>(&self, status: SyncStatus) -> Result<usize> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE sync_status = ?",
            R::STORE.table()
        );
        let mut rows = self.conn.query(&sql, [status.as_str()]).await?;
        let count: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        usize::try_from(count).map_err(|error| Error::Database(error.to_string()))
    }
}
