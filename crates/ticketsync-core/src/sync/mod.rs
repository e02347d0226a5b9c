//! Offline sync: outbox snapshots, the wire exchange, reconciliation and
//! scheduling.

mod engine;
mod outbox;
mod protocol;
mod reconcile;
mod scheduler;
mod transport;

pub use engine::{CycleReport, CycleRequest, SyncEngine, SyncError};
pub use outbox::{Outbox, OutboxBuilder, OutboxPhoto};
pub use protocol::{
    ErrorCode, PhotoResult, PhotoUpload, ResultStatus, ServerTicketUpdate, ServerUpdates,
    SyncRequest, SyncResponse, SyncResults, TicketChange, TicketResult, UpdateAction,
};
pub use reconcile::{ReconcileReport, Reconciler};
pub use scheduler::{SyncScheduler, SyncStatusSnapshot, Trigger, TriggerOutcome};
pub use transport::{
    exchange_with_retry, HttpSyncTransport, RetryPolicy, SyncTransport, TransportError,
    TransportResult,
};

pub(crate) use transport::{classify, decode_body, normalize_base_url, parse_api_error};
