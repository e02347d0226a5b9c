//! REST client for online-first ticket work.

mod tickets;
mod types;

pub use tickets::TicketsApi;
pub use types::{
    CreateTicketResponse, CreatedTicket, OffenceUpdate, Page, PageInfo, PageRequest, PrintData,
    RemoteTicket, SortOrder, TicketFilters, TicketSummary, TicketUpdate, UploadedPhoto,
};
