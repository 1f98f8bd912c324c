//! Status command handler

use anyhow::Result;

use tabsync_core::Store;

use crate::output::{Output, OutputFormat};

/// Show status information
pub async fn show(store: &Store, output: &Output) -> Result<()> {
    let config = store.config();
    let groups = store.groups().await?;
    let tab_count: usize = groups.iter().map(|g| g.tabs.len()).sum();
    let unsynced = groups.iter().filter(|g| g.has_unsynced_changes()).count();

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "device_id": store.device_id(),
                    "user_id": store.user_id(),
                    "sync_enabled": config.sync_enabled,
                    "signed_in": store.is_signed_in(),
                    "remote_url": config.remote_url,
                    "conflict_strategy": config.conflict_strategy,
                    "scheduler": store.sync_status(),
                    "data_dir": config.data_dir,
                    "counts": {
                        "groups": groups.len(),
                        "tabs": tab_count,
                        "unsynced": unsynced
                    }
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", store.device_id());
        }
        OutputFormat::Human => {
            println!("tabsync Status");
            println!("==============");
            println!();
            println!("Identity:");
            println!("  Device: {}", store.device_id());
            println!("  User:   {}", store.user_id());
            println!();
            println!("Sync:");
            println!(
                "  Status:    {}",
                if config.sync_enabled {
                    "enabled"
                } else {
                    "disabled"
                }
            );
            println!(
                "  Signed in: {}",
                if store.is_signed_in() { "yes" } else { "no" }
            );
            if let Some(ref url) = config.remote_url {
                println!("  Server:    {}", url);
            }
            println!("  Strategy:  {}", config.conflict_strategy);
            println!();
            println!("Storage:");
            println!("  Location: {}", config.groups_path().display());
            println!();
            println!("Contents:");
            println!("  Groups:   {}", groups.len());
            println!("  Tabs:     {}", tab_count);
            println!("  Unsynced: {}", unsynced);
        }
    }

    Ok(())
}
