//! Conflict audit trail and sync log

use chrono::{DateTime, Utc};
use libsql::{Connection, Value};

use crate::error::{Error, Result};
use crate::models::{SyncConflict, SyncLogEntry, SyncLogKind, TicketConflict, TicketId};

/// Trait for append-mostly sync history (async)
#[allow(async_fn_in_trait)]
pub trait AuditRepository {
    /// Record a newly detected conflict; returns the audit row id
    async fn record_conflict(&self, ticket_id: &TicketId, conflict: &TicketConflict)
        -> Result<i64>;

    /// Close every open audit row of a ticket
    async fn mark_resolved(
        &self,
        ticket_id: &TicketId,
        resolution: &str,
        resolved_at: DateTime<Utc>,
    ) -> Result<usize>;

    /// Conflicts newest-first; open ones only unless `include_resolved`
    async fn list_conflicts(&self, limit: usize, include_resolved: bool)
        -> Result<Vec<SyncConflict>>;

    /// Append one sync log line
    async fn append_log(
        &self,
        kind: SyncLogKind,
        details: &str,
        item_count: Option<i64>,
        duration_ms: Option<i64>,
    ) -> Result<()>;

    /// Most recent log lines, newest-first
    async fn recent_log(&self, limit: usize) -> Result<Vec<SyncLogEntry>>;
}

/// libSQL implementation of `AuditRepository`
pub struct LibSqlAuditRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlAuditRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

fn limit_value(limit: usize) -> Value {
    Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX))
}

fn optional_integer(value: Value) -> Option<i64> {
    match value {
        Value::Integer(number) => Some(number),
        _ => None,
    }
}

fn optional_text(value: Value) -> Option<String> {
    match value {
        Value::Text(text) => Some(text),
        _ => None,
    }
}

fn parse_conflict(row: &libsql::Row) -> Result<SyncConflict> {
    let kind: String = row.get(2)?;
    Ok(SyncConflict {
        id: row.get(0)?,
        ticket_id: row.get(1)?,
        kind: kind.parse().map_err(Error::Database)?,
        local_payload: row.get(3)?,
        server_payload: optional_text(row.get_value(4)?),
        reason: optional_text(row.get_value(5)?),
        detected_at: row.get(6)?,
        resolved_at: optional_integer(row.get_value(7)?),
        resolution: optional_text(row.get_value(8)?),
    })
}

fn parse_log_entry(row: &libsql::Row) -> Result<SyncLogEntry> {
    let kind: String = row.get(1)?;
    Ok(SyncLogEntry {
        id: row.get(0)?,
        kind: kind.parse().map_err(Error::Database)?,
        details: row.get(2)?,
        item_count: optional_integer(row.get_value(3)?),
        duration_ms: optional_integer(row.get_value(4)?),
        timestamp: row.get(5)?,
    })
}

impl AuditRepository for LibSqlAuditRepository<'_> {
    async fn record_conflict(
        &self,
        ticket_id: &TicketId,
        conflict: &TicketConflict,
    ) -> Result<i64> {
        let server_payload = conflict
            .server_payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.conn
            .execute(
                "INSERT INTO sync_conflicts
                    (ticket_id, kind, local_payload, server_payload, reason, detected_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
                libsql::params_from_iter([
                    Value::Text(ticket_id.as_str()),
                    Value::Text(conflict.kind.as_str().to_string()),
                    Value::Text(serde_json::to_string(&conflict.local_payload)?),
                    server_payload.map_or(Value::Null, Value::Text),
                    conflict.reason.clone().map_or(Value::Null, Value::Text),
                    Value::Integer(conflict.detected_at.timestamp_millis()),
                ]),
            )
            .await?;

        Ok(self.conn.last_insert_rowid())
    }

    async fn mark_resolved(
        &self,
        ticket_id: &TicketId,
        resolution: &str,
        resolved_at: DateTime<Utc>,
    ) -> Result<usize> {
        let updated = self
            .conn
            .execute(
                "UPDATE sync_conflicts SET resolved_at = ?, resolution = ?
                 WHERE ticket_id = ? AND resolved_at IS NULL",
                libsql::params_from_iter([
                    Value::Integer(resolved_at.timestamp_millis()),
                    Value::Text(resolution.to_string()),
                    Value::Text(ticket_id.as_str()),
                ]),
            )
            .await?;
        usize::try_from(updated).map_err(|error| Error::Database(error.to_string()))
    }

    async fn list_conflicts(
        &self,
        limit: usize,
        include_resolved: bool,
    ) -> Result<Vec<SyncConflict>> {
        let filter = if include_resolved {
            ""
        } else {
            "WHERE resolved_at IS NULL"
        };
        let sql = format!(
            "SELECT id, ticket_id, kind, local_payload, server_payload, reason,
                    detected_at, resolved_at, resolution
             FROM sync_conflicts {filter}
             ORDER BY detected_at DESC, id DESC
             LIMIT ?"
        );

        let mut rows = self.conn.query(&sql, [limit_value(limit)]).await?;
        let mut conflicts = Vec::new();
        while let Some(row) = rows.next().await? {
            conflicts.push(parse_conflict(&row)?);
        }
        Ok(conflicts)
    }

    async fn append_log(
        &self,
        kind: SyncLogKind,
        details: &str,
        item_count: Option<i64>,
        duration_ms: Option<i64>,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO sync_log (kind, details, item_count, duration_ms, timestamp)
                 VALUES (?, ?, ?, ?, ?)",
                libsql::params_from_iter([
                    Value::Text(kind.as_str().to_string()),
                    Value::Text(details.to_string()),
                    item_count.map_or(Value::Null, Value::Integer),
                    duration_ms.map_or(Value::Null, Value::Integer),
                    Value::Integer(Utc::now().timestamp_millis()),
                ]),
            )
            .await?;
        Ok(())
    }

    async fn recent_log(&self, limit: usize) -> Result<Vec<SyncLogEntry>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, kind, details, item_count, duration_ms, timestamp
                 FROM sync_log
                 ORDER BY timestamp DESC, id DESC
                 LIMIT ?",
                [limit_value(limit)],
            )
            .await?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            entries.push(parse_log_entry(&row)?);
        }
        Ok(entries)
    }
}
