//! ticketsync CLI - issue traffic tickets offline and sync them later
//!
//! Tickets are written to a local store first; `sync` and `daemon` push them
//! to the ticket server whenever it can be reached.

mod cli;
mod commands;
mod error;

use clap::Parser;

use crate::cli::{Cli, Commands, RemoteCommands, SyncCommands};
use crate::commands::common::Context;
use crate::commands::daemon::run_daemon;
use crate::commands::edit::run_edit;
use crate::commands::issue::run_issue;
use crate::commands::list::run_list;
use crate::commands::photo::run_photo;
use crate::commands::remote::{run_remote_get, run_remote_search, run_remote_void};
use crate::commands::resolve::run_resolve;
use crate::commands::retry::run_retry;
use crate::commands::show::run_show;
use crate::commands::sync::{run_sync, run_sync_conflicts, run_sync_log, run_sync_status};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let filter = tracing_subscriber::EnvFilter::from_default_env();
    let filter = match "ticketsync=info".parse() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let context = Context::resolve(cli.db_path, cli.config)?;

    match cli.command {
        Commands::Issue { from_json } => run_issue(&from_json, &context).await?,
        Commands::List {
            status,
            limit,
            json,
        } => run_list(status.map(Into::into), limit, json, &context).await?,
        Commands::Show { id, json } => run_show(&id, json, &context).await?,
        Commands::Edit { id, from_json } => run_edit(&id, &from_json, &context).await?,
        Commands::Photo { id, path, kind } => {
            run_photo(&id, &path, kind.into(), &context).await?;
        }
        Commands::Sync { command } => match command {
            None => run_sync(&context).await?,
            Some(SyncCommands::Status { json }) => run_sync_status(json, &context).await?,
            Some(SyncCommands::Conflicts {
                history,
                limit,
                json,
            }) => run_sync_conflicts(history, limit, json, &context).await?,
            Some(SyncCommands::Log { limit, json }) => run_sync_log(limit, json, &context).await?,
        },
        Commands::Resolve { id, resolution } => run_resolve(&id, &resolution, &context).await?,
        Commands::Retry { id, all } => run_retry(id.as_deref(), all, &context).await?,
        Commands::Daemon => run_daemon(&context).await?,
        Commands::Remote { command } => match command {
            RemoteCommands::Get { id, by_number } => {
                run_remote_get(&id, by_number, &context).await?;
            }
            RemoteCommands::Search { query } => run_remote_search(&query, &context).await?,
            RemoteCommands::Void { id, reason } => run_remote_void(&id, &reason, &context).await?,
        },
    }

    Ok(())
}
