//! Shared services used by hosts and the sync engine.

mod local_store;
mod tickets;

pub use local_store::{LocalStore, StoreGuard, SyncCounts};
pub use tickets::OfflineTickets;
