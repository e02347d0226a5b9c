use ticketsync_core::SyncStatus;

use crate::commands::common::{format_ticket_lines, print_json, ticket_to_list_item, Context};
use crate::error::CliError;

pub async fn run_list(
    status: Option<SyncStatus>,
    limit: usize,
    as_json: bool,
    context: &Context,
) -> Result<(), CliError> {
    let tickets = context.tickets().await?;
    let mut listed = match status {
        Some(status) => tickets.tickets_with_status(status).await?,
        None => tickets.local_tickets().await?,
    };
    listed.truncate(limit);

    if as_json {
        let items = listed.iter().map(ticket_to_list_item).collect::<Vec<_>>();
        return print_json(&items);
    }

    if listed.is_empty() {
        println!("No tickets on this device.");
        return Ok(());
    }
    for line in format_ticket_lines(&listed) {
        println!("{line}");
    }
    Ok(())
}
