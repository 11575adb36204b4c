//! Status command handler

use anyhow::Result;

use lodo_core::Store;

use crate::output::{Output, OutputFormat};

/// Show status information
pub fn show(store: &Store, output: &Output) -> Result<()> {
    let config = store.config();
    let stats = store.outbox_stats()?;
    let tasks = store.task_count()?;

    let db_size = std::fs::metadata(config.sqlite_path())
        .map(|m| m.len())
        .unwrap_or(0);

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "storage": {
                        "location": config.data_dir,
                        "persistent": store.is_persistent(),
                        "database_size": db_size,
                    },
                    "sync": {
                        "enabled": config.sync_enabled,
                        "url": config.sync_url,
                        "max_retries": config.max_retries,
                    },
                    "counts": {
                        "tasks": tasks,
                        "pending": stats.pending,
                        "delivered": stats.delivered,
                        "failed": stats.failed,
                    }
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", stats.pending);
        }
        OutputFormat::Human => {
            println!("lodo Status");
            println!("===========");
            println!();
            println!("Storage:");
            println!("  Location: {}", config.data_dir.display());
            println!(
                "  Mode:     {}",
                if store.is_persistent() {
                    "persistent"
                } else {
                    "in-memory (degraded)"
                }
            );
            println!("  Size:     {} bytes", db_size);
            println!();
            println!("Sync:");
            println!(
                "  Status:      {}",
                if config.sync_enabled {
                    "enabled"
                } else {
                    "disabled"
                }
            );
            if let Some(ref url) = config.sync_url {
                println!("  Server:      {}", url);
            }
            println!("  Max retries: {}", config.max_retries);
            println!();
            println!("Contents:");
            println!("  Tasks:           {}", tasks);
            println!("  Awaiting sync:   {}", stats.pending);
            if stats.failed > 0 {
                println!("  Failed to sync:  {}", stats.failed);
            }
        }
    }

    Ok(())
}
