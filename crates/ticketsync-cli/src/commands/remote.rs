use ticketsync_core::api::TicketsApi;

use crate::commands::common::{print_json, Context};
use crate::error::CliError;

fn tickets_api(context: &Context) -> Result<TicketsApi, CliError> {
    if context.settings.api_base_url.is_none() {
        return Err(CliError::SyncNotConfigured);
    }
    Ok(TicketsApi::from_settings(&context.settings)?)
}

pub fn normalize_search_query(query: &str) -> Result<String, CliError> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptySearchQuery)
    } else {
        Ok(trimmed.to_string())
    }
}

pub async fn run_remote_get(id: &str, by_number: bool, context: &Context) -> Result<(), CliError> {
    let api = tickets_api(context)?;
    let ticket = if by_number {
        api.get_by_number(id.trim()).await?
    } else {
        api.get_by_id(id.trim()).await?
    };
    print_json(&ticket)
}

pub async fn run_remote_search(query: &str, context: &Context) -> Result<(), CliError> {
    let query = normalize_search_query(query)?;
    let api = tickets_api(context)?;
    let results = api.search(&query).await?;
    print_json(&results)
}

pub async fn run_remote_void(id: &str, reason: &str, context: &Context) -> Result<(), CliError> {
    let api = tickets_api(context)?;
    let ticket = api.void(id.trim(), reason).await?;
    println!("Voided {} ({})", ticket.ticket_number, ticket.id);
    Ok(())
}
