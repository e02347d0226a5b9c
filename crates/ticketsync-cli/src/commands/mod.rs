pub mod common;
pub mod daemon;
pub mod edit;
pub mod issue;
pub mod list;
pub mod photo;
pub mod remote;
pub mod resolve;
pub mod retry;
pub mod show;
pub mod sync;
