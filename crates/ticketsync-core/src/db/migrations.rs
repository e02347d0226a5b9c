//! Database migrations

use crate::error::Result;
use libsql::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub async fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;

    if version < 1 {
        migrate_v1(conn).await?;
    }
    if version < 2 {
        migrate_v2(conn).await?;
    }

    Ok(())
}

/// Get the current schema version
async fn get_version(conn: &Connection) -> Result<i32> {
    // Check if schema_version table exists
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

/// Run statements atomically; libsql has no `execute_batch`.
async fn apply(conn: &Connection, version: i32, statements: &[&str]) -> Result<()> {
    conn.execute("BEGIN TRANSACTION", ()).await?;

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn
        .execute("INSERT INTO schema_version (version) VALUES (?)", [i64::from(version)])
        .await
    {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    tracing::info!("Migrated database to version {version}");
    Ok(())
}

/// Migration to version 1: record stores and sync state
async fn migrate_v1(conn: &Connection) -> Result<()> {
    apply(
        conn,
        1,
        &[
            // Schema version tracking
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            // Tickets store: indexed columns plus the full record as JSON
            "CREATE TABLE IF NOT EXISTS tickets (
                id TEXT PRIMARY KEY,
                server_id TEXT,
                sync_status TEXT NOT NULL,
                parent_id TEXT,
                updated_at INTEGER NOT NULL,
                body TEXT NOT NULL,
                blob BLOB
            )",
            "CREATE INDEX IF NOT EXISTS idx_tickets_sync_status ON tickets(sync_status)",
            "CREATE INDEX IF NOT EXISTS idx_tickets_server_id ON tickets(server_id)",
            "CREATE INDEX IF NOT EXISTS idx_tickets_updated ON tickets(updated_at)",
            // Photos store; bytes live in `blob`
            "CREATE TABLE IF NOT EXISTS photos (
                id TEXT PRIMARY KEY,
                server_id TEXT,
                sync_status TEXT NOT NULL,
                parent_id TEXT NOT NULL REFERENCES tickets(id) ON DELETE CASCADE,
                updated_at INTEGER NOT NULL,
                body TEXT NOT NULL,
                blob BLOB
            )",
            "CREATE INDEX IF NOT EXISTS idx_photos_sync_status ON photos(sync_status)",
            "CREATE INDEX IF NOT EXISTS idx_photos_server_id ON photos(server_id)",
            "CREATE INDEX IF NOT EXISTS idx_photos_parent ON photos(parent_id)",
            // Watermark and other sync bookkeeping (local only)
            "CREATE TABLE IF NOT EXISTS sync_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
        ],
    )
    .await
}

/// Migration to version 2: conflict audit trail and sync log
async fn migrate_v2(conn: &Connection) -> Result<()> {
    apply(
        conn,
        2,
        &[
            "CREATE TABLE IF NOT EXISTS sync_conflicts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ticket_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                local_payload TEXT NOT NULL,
                server_payload TEXT,
                reason TEXT,
                detected_at INTEGER NOT NULL,
                resolved_at INTEGER,
                resolution TEXT
            )",
            "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_ticket_id ON sync_conflicts(ticket_id)",
            "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_detected_at ON sync_conflicts(detected_at DESC)",
            "CREATE TABLE IF NOT EXISTS sync_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                details TEXT NOT NULL,
                item_count INTEGER,
                duration_ms INTEGER,
                timestamp INTEGER NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_sync_log_timestamp ON sync_log(timestamp DESC)",
        ],
    )
    .await?;

    tracing::debug!("Schema is at version {CURRENT_VERSION}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use libsql::Builder;

    async fn setup() -> Connection {
        let db = Builder::new_local(":memory:").build().await.unwrap();
        db.connect().unwrap()
    }

    async fn table_exists(conn: &Connection, name: &str) -> bool {
        let mut rows = conn
            .query(
                "SELECT EXISTS(
                    SELECT 1 FROM sqlite_master
                    WHERE type = 'table' AND name = ?
                )",
                [name],
            )
            .await
            .unwrap();

        rows.next()
            .await
            .unwrap()
            .is_some_and(|row| row.get::<i32>(0).unwrap() != 0)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_migrations() {
        let conn = setup().await;
        run(&conn).await.unwrap();

        let version = get_version(&conn).await.unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_migrations_idempotent() {
        let conn = setup().await;
        run(&conn).await.unwrap();
        run(&conn).await.unwrap(); // Should not fail

        let version = get_version(&conn).await.unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_migrations_create_stores() {
        let conn = setup().await;
        run(&conn).await.unwrap();

        for table in ["tickets", "photos", "sync_state", "sync_conflicts", "sync_log"] {
            assert!(table_exists(&conn, table).await, "missing table {table}");
        }
    }
}
