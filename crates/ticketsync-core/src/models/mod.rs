//! Data models for ticketsync

mod conflict;
mod ids;
mod photo;
mod sync_log;
mod sync_status;
mod ticket;

pub use conflict::{ConflictKind, ConflictResolution, SyncConflict, TicketConflict};
pub use ids::{PhotoId, TicketId};
pub use photo::{Photo, PhotoKind, MAX_PHOTO_BYTES};
pub use sync_log::{SyncLogEntry, SyncLogKind};
pub use sync_status::{SyncMeta, SyncStatus};
pub use ticket::{
    ChangeAction, DriverInfo, GeoLocation, OffenceCategory, SelectedOffence, Ticket,
    TicketPayload, TicketStatus, VehicleInfo, VehicleType,
};

#[cfg(test)]
pub(crate) use ticket::fixtures;
