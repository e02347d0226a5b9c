use crate::commands::common::{resolve_ticket, Context};
use crate::error::CliError;

pub async fn run_retry(query: Option<&str>, all: bool, context: &Context) -> Result<(), CliError> {
    let tickets = context.tickets().await?;

    if all {
        let count = tickets.retry_all_failed().await?;
        println!("Requeued {count} failed records");
        return Ok(());
    }

    let query = query.ok_or(CliError::EmptyTicketId)?;
    let ticket = resolve_ticket(&tickets, query).await?;
    let requeued = tickets.retry_failed(&ticket.id).await?;
    println!("{}  {}", requeued.id, requeued.sync_status);
    Ok(())
}
