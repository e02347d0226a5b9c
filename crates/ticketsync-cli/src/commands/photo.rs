use std::path::Path;

use ticketsync_core::models::PhotoKind;

use crate::commands::common::{mime_for_path, resolve_ticket, Context};
use crate::error::CliError;

pub async fn run_photo(
    query: &str,
    path: &Path,
    kind: PhotoKind,
    context: &Context,
) -> Result<(), CliError> {
    let mime_type =
        mime_for_path(path).ok_or_else(|| CliError::UnsupportedPhoto(path.to_path_buf()))?;
    let data = std::fs::read(path)?;

    let tickets = context.tickets().await?;
    let ticket = resolve_ticket(&tickets, query).await?;
    let photo = tickets
        .attach_photo(&ticket.id, kind, mime_type, data)
        .await?;

    println!("{}", photo.id);
    Ok(())
}
