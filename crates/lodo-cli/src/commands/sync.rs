//! Sync command handler

use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::debug;

use lodo_core::{DrainOutcome, LogDelivery, Store, SyncCoordinator};

use crate::output::Output;

/// Explicitly drain the outbox
pub async fn run(store: &Arc<Store>, output: &Output) -> Result<()> {
    let config = store.config();

    if !config.sync_enabled {
        bail!(
            "Sync is not enabled. Enable it with:\n  \
             lodo config set sync_enabled true\n  \
             lodo config set sync_url https://your-server/api"
        );
    }

    let pending = store.pending_count()?;
    if pending == 0 {
        output.success("Sync complete - nothing to deliver");
        return Ok(());
    }

    output.message(&format!("Delivering {} pending change(s)...", pending));

    let coordinator = SyncCoordinator::new(
        Arc::clone(store),
        Arc::new(LogDelivery),
        config.max_retries,
    );

    match coordinator.drain().await? {
        DrainOutcome::Completed(report) => {
            output.success(&format!(
                "Sync complete - {} delivered, {} to retry, {} failed",
                report.delivered, report.retried, report.failed
            ));
            if report.failed > 0 {
                for entry in store.failed_entries()? {
                    output.message(&format!(
                        "  task {} ({}) could not be delivered after {} attempts",
                        entry.task_id,
                        entry.action.as_str(),
                        entry.retry_count
                    ));
                }
            }

            // Delivered entries have served their purpose
            let pruned = store.prune_delivered()?;
            if pruned > 0 {
                debug!(pruned, "removed delivered outbox entries");
            }
        }
        DrainOutcome::Coalesced => {
            output.message("A sync is already running; changes will be picked up.");
        }
    }

    Ok(())
}
