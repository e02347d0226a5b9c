use std::path::Path;

use crate::commands::common::{read_payload, resolve_ticket, Context};
use crate::error::CliError;

pub async fn run_edit(query: &str, payload_path: &Path, context: &Context) -> Result<(), CliError> {
    let payload = read_payload(payload_path)?;

    let tickets = context.tickets().await?;
    let ticket = resolve_ticket(&tickets, query).await?;
    let edited = tickets.edit_ticket(&ticket.id, payload).await?;

    println!("{}  {}", edited.id, edited.sync_status);
    Ok(())
}
