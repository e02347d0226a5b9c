use std::path::Path;

use crate::commands::common::{read_payload, Context};
use crate::error::CliError;

pub async fn run_issue(payload_path: &Path, context: &Context) -> Result<(), CliError> {
    let payload = read_payload(payload_path)?;

    let tickets = context.tickets().await?;
    let ticket = tickets.issue_ticket(payload).await?;

    println!("{}", ticket.id);
    Ok(())
}
