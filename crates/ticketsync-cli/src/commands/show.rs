use serde::Serialize;
use ticketsync_core::{Photo, Ticket};

use crate::commands::common::{format_datetime, print_json, resolve_ticket, Context};
use crate::error::CliError;

#[derive(Serialize)]
struct TicketDetails<'a> {
    ticket: &'a Ticket,
    photos: &'a [Photo],
}

pub async fn run_show(query: &str, as_json: bool, context: &Context) -> Result<(), CliError> {
    let tickets = context.tickets().await?;
    let ticket = resolve_ticket(&tickets, query).await?;
    let photos = tickets.photos_for(&ticket.id).await?;

    if as_json {
        return print_json(&TicketDetails {
            ticket: &ticket,
            photos: &photos,
        });
    }

    for line in format_ticket_details(&ticket, &photos) {
        println!("{line}");
    }
    Ok(())
}

pub fn format_ticket_details(ticket: &Ticket, photos: &[Photo]) -> Vec<String> {
    let payload = &ticket.payload;
    let mut lines = vec![
        format!("Ticket     {} ({})", payload.ticket_number, ticket.id),
        format!(
            "Status     {} / sync {}",
            payload.status.as_str(),
            ticket.sync_status
        ),
        format!(
            "Server ID  {}",
            ticket.server_id.as_deref().unwrap_or("(not synced)")
        ),
        format!(
            "Vehicle    {} {}",
            payload.vehicle.registration_number,
            [payload.vehicle.make.as_deref(), payload.vehicle.model.as_deref()]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" ")
        ),
        format!("Issued     {}", format_datetime(payload.issued_at)),
        format!("Officer    {}", payload.officer_id),
    ];
    if let Some(driver) = &payload.driver {
        lines.push(format!(
            "Driver     {} {}",
            driver.first_name, driver.last_name
        ));
    }
    for offence in &payload.offences {
        lines.push(format!(
            "Offence    {:<8}  {:>9.2}  {}",
            offence.id, offence.fine, offence.name
        ));
    }
    lines.push(format!("Total      {:.2}", payload.total_fine));
    if let Some(error) = &ticket.sync.last_error {
        lines.push(format!(
            "Last error {error} (attempts: {})",
            ticket.sync.attempts
        ));
    }
    if let Some(conflict) = &ticket.conflict {
        lines.push(format!(
            "Conflict   {} since {}: {}",
            conflict.kind,
            format_datetime(conflict.detected_at),
            conflict.reason.as_deref().unwrap_or("-")
        ));
    }
    for photo in photos {
        lines.push(format!(
            "Photo      {}  {:<8}  {}",
            photo.id, photo.kind, photo.sync_status
        ));
    }
    lines
}
