//! ticketsync-core - Offline-first sync core for traffic tickets
//!
//! This crate contains the ticket models, the durable local store, the sync
//! engine and scheduler, and the REST client shared by every ticketsync host.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod sync;
pub mod util;

pub use config::SyncSettings;
pub use error::{Error, Result};
pub use models::{Photo, PhotoId, SyncStatus, Ticket, TicketId, TicketPayload};
pub use services::{LocalStore, OfflineTickets};
pub use sync::{SyncEngine, SyncScheduler};
