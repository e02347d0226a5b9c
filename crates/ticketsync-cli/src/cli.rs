use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use ticketsync_core::models::PhotoKind;
use ticketsync_core::SyncStatus;

#[derive(Parser)]
#[command(name = "ticketsync")]
#[command(about = "Issue traffic tickets offline and sync them when the network allows")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the local ticket store
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Path to a JSON sync settings file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Issue a ticket on this device
    Issue {
        /// Ticket payload as JSON (`-` reads stdin)
        #[arg(long, value_name = "PATH")]
        from_json: PathBuf,
    },
    /// List tickets on this device
    List {
        /// Only tickets in this sync state
        #[arg(long, value_enum)]
        status: Option<StatusFilter>,
        /// Number of tickets to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one ticket and its photos
    Show {
        /// Ticket ID, unique ID prefix, or ticket number
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Replace the payload of a ticket
    Edit {
        /// Ticket ID, unique ID prefix, or ticket number
        id: String,
        /// New payload as JSON (`-` reads stdin)
        #[arg(long, value_name = "PATH")]
        from_json: PathBuf,
    },
    /// Attach a photo to a ticket
    Photo {
        /// Ticket ID, unique ID prefix, or ticket number
        id: String,
        /// Image file
        path: PathBuf,
        /// What the photo shows
        #[arg(long, value_enum, default_value_t = PhotoKindArg::Evidence)]
        kind: PhotoKindArg,
    },
    /// Run a sync cycle, or inspect sync state
    Sync {
        #[command(subcommand)]
        command: Option<SyncCommands>,
    },
    /// Settle a ticket conflict
    Resolve {
        /// Ticket ID, unique ID prefix, or ticket number
        id: String,
        #[command(flatten)]
        resolution: ResolutionArgs,
    },
    /// Put tickets the server rejected back in the queue
    Retry {
        /// Ticket ID, unique ID prefix, or ticket number
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        id: Option<String>,
        /// Retry every failed ticket and photo
        #[arg(long)]
        all: bool,
    },
    /// Keep syncing in the background until interrupted
    Daemon,
    /// Work with tickets on the server directly
    Remote {
        #[command(subcommand)]
        command: RemoteCommands,
    },
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// Show unsynced, conflict and failure counts
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List tickets waiting for a conflict decision
    Conflicts {
        /// Show the conflict audit trail, resolved entries included
        #[arg(long)]
        history: bool,
        /// Number of history entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show recent sync activity
    Log {
        /// Number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum RemoteCommands {
    /// Fetch a ticket from the server
    Get {
        /// Server ticket ID, or ticket number with `--by-number`
        id: String,
        /// Look the ticket up by its printed number
        #[arg(long)]
        by_number: bool,
    },
    /// Search tickets on the server
    Search {
        /// Search query
        query: String,
    },
    /// Void a ticket on the server
    Void {
        /// Server ticket ID
        id: String,
        /// Reason recorded with the void
        #[arg(long)]
        reason: String,
    },
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
#[group(required = true, multiple = false)]
pub struct ResolutionArgs {
    /// Re-submit the officer's version
    #[arg(long)]
    pub keep_local: bool,
    /// Take the server's version
    #[arg(long)]
    pub accept_server: bool,
    /// Re-submit a hand-merged payload read from this JSON file
    #[arg(long, value_name = "PATH")]
    pub replace: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum StatusFilter {
    Pending,
    Syncing,
    Synced,
    Error,
    Conflict,
}

impl From<StatusFilter> for SyncStatus {
    fn from(filter: StatusFilter) -> Self {
        match filter {
            StatusFilter::Pending => Self::Pending,
            StatusFilter::Syncing => Self::Syncing,
            StatusFilter::Synced => Self::Synced,
            StatusFilter::Error => Self::Error,
            StatusFilter::Conflict => Self::Conflict,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum PhotoKindArg {
    Vehicle,
    Plate,
    Evidence,
    Other,
}

impl From<PhotoKindArg> for PhotoKind {
    fn from(kind: PhotoKindArg) -> Self {
        match kind {
            PhotoKindArg::Vehicle => Self::Vehicle,
            PhotoKindArg::Plate => Self::Plate,
            PhotoKindArg::Evidence => Self::Evidence,
            PhotoKindArg::Other => Self::Other,
        }
    }
}
