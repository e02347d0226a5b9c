use ticketsync_core::models::ConflictResolution;

use crate::cli::ResolutionArgs;
use crate::commands::common::{read_payload, resolve_ticket, Context};
use crate::error::CliError;

pub fn resolution_from_args(args: &ResolutionArgs) -> Result<ConflictResolution, CliError> {
    if let Some(path) = &args.replace {
        return Ok(ConflictResolution::Replace(read_payload(path)?));
    }
    if args.accept_server {
        Ok(ConflictResolution::AcceptServer)
    } else {
        Ok(ConflictResolution::KeepLocal)
    }
}

pub async fn run_resolve(
    query: &str,
    args: &ResolutionArgs,
    context: &Context,
) -> Result<(), CliError> {
    let resolution = resolution_from_args(args)?;

    let tickets = context.tickets().await?;
    let ticket = resolve_ticket(&tickets, query).await?;
    match tickets.resolve_conflict(&ticket.id, resolution).await? {
        Some(kept) => println!("{}  {}", kept.id, kept.sync_status),
        None => println!("{}  removed", ticket.id),
    }
    Ok(())
}
