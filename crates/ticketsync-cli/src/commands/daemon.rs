use ticketsync_core::sync::{SyncStatusSnapshot, Trigger};
use ticketsync_core::SyncScheduler;

use crate::commands::common::Context;
use crate::error::CliError;

pub async fn run_daemon(context: &Context) -> Result<(), CliError> {
    let store = context.open_store().await?;
    let engine = context.engine(store)?;
    let scheduler = SyncScheduler::new(engine, context.settings.sync_interval());

    let mut updates = scheduler.subscribe();
    let reporter = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let snapshot = updates.borrow_and_update().clone();
            if !snapshot.syncing {
                report(&snapshot);
            }
        }
    });

    scheduler.start();
    scheduler.trigger(Trigger::Interval);
    println!(
        "Syncing every {}s; press Ctrl-C to stop",
        context.settings.sync_interval_secs
    );

    tokio::signal::ctrl_c().await?;
    scheduler.stop();
    let mut status = scheduler.subscribe();
    if status.wait_for(|snapshot| !snapshot.syncing).await.is_err() {
        tracing::debug!("Scheduler status channel closed before the last cycle finished");
    }
    reporter.abort();

    println!("Sync daemon stopped");
    Ok(())
}

fn report(snapshot: &SyncStatusSnapshot) {
    match &snapshot.last_error {
        Some(error) => tracing::warn!(
            "Sync failed ({} unsynced, {} conflicts, {} failed): {error}",
            snapshot.unsynced_count,
            snapshot.conflict_count,
            snapshot.failed_count
        ),
        None => tracing::info!(
            "Sync idle: {} unsynced, {} conflicts, {} failed",
            snapshot.unsynced_count,
            snapshot.conflict_count,
            snapshot.failed_count
        ),
    }
}
