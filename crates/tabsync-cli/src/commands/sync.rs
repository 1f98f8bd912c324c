//! Sync command handlers

use anyhow::{bail, Result};
use tracing::info;

use tabsync_core::sync::ConnectionState;
use tabsync_core::Store;

use crate::output::Output;

fn ensure_sync_configured(store: &Store) -> Result<()> {
    let config = store.config();

    if !config.sync_enabled {
        bail!(
            "Sync is not enabled. Enable it with:\n  \
             tabsync config set sync_enabled true\n  \
             tabsync config set remote_url https://your-server"
        );
    }

    if config.remote_url.is_none() {
        bail!(
            "Remote URL not configured. Set it with:\n  \
             tabsync config set remote_url https://your-server"
        );
    }

    if !store.is_signed_in() {
        bail!(
            "Not signed in. Set an auth token with:\n  \
             tabsync config set auth_token <token>"
        );
    }

    Ok(())
}

/// Pull, merge and push right now
pub async fn sync(store: &Store, output: &Output) -> Result<()> {
    ensure_sync_configured(store)?;

    output.message("Syncing tab groups...");
    let report = store.sync_now().await?;
    output.print_sync_report(&report);

    if report.conflicts > 0 {
        output.message("Run `tabsync conflicts list` to review conflicts.");
    }
    Ok(())
}

/// Follow remote changes until interrupted
pub async fn watch(store: &Store, output: &Output) -> Result<()> {
    ensure_sync_configured(store)?;

    // Catch up before listening
    let report = store.sync_now().await?;
    output.print_sync_report(&report);

    let handle = store.start_realtime();
    let mut states = handle.subscribe_state();
    output.message("Watching for remote changes (Ctrl+C to stop)...");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping listener");
                break;
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                output.message(&format!("Connection: {}", state));
                if state == ConnectionState::Failed {
                    handle.shutdown().await;
                    store.flush().await?;
                    bail!("Realtime connection failed after repeated attempts");
                }
            }
        }
    }

    handle.shutdown().await;
    store.flush().await?;
    output.success("Stopped watching");
    Ok(())
}

/// Push anything a write command scheduled before the process exits
///
/// Failures are reported but never fail the command: the local write
/// already succeeded and will be pushed by the next sync.
pub async fn flush_pending(store: &Store, output: &Output) {
    if !store.config().sync_enabled || !store.is_signed_in() {
        store.scheduler().cancel_pending();
        return;
    }

    match store.flush().await {
        Ok(Some(report)) if report.conflicts > 0 && !output.is_quiet() => {
            eprintln!(
                "⚠ {} conflict(s) detected. Run `tabsync conflicts list` to review.",
                report.conflicts
            );
        }
        Ok(_) => {}
        Err(e) => {
            if !output.is_quiet() {
                eprintln!("⚠ Auto-sync failed: {}", e);
            }
        }
    }
}
