//! Database layer for ticketsync

mod audit_repository;
mod connection;
mod migrations;
mod record_repository;
mod sync_state_repository;

pub use audit_repository::{AuditRepository, LibSqlAuditRepository};
pub use connection::Database;
pub use record_repository::{Index, LibSqlRecordRepository, Record, RecordRepository, RecordRow, Store};
pub use sync_state_repository::{LibSqlSyncStateRepository, SyncStateRepository};
