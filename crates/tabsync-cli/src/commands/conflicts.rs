//! Conflict command handlers
//!
//! Conflicts are detected during a pull, so both commands pull first.

use anyhow::{bail, Context, Result};

use tabsync_core::{Resolution, Store};

use crate::output::{short_id, Output};

async fn refresh(store: &Store) -> Result<()> {
    if store.config().sync_enabled && store.is_signed_in() {
        store.sync_now().await.context("Failed to pull remote changes")?;
    }
    Ok(())
}

pub async fn list(store: &Store, output: &Output) -> Result<()> {
    refresh(store).await?;
    output.print_conflicts(&store.pending_conflicts());
    Ok(())
}

pub async fn resolve(store: &Store, id: String, keep: String, output: &Output) -> Result<()> {
    let resolution: Resolution = keep.parse().map_err(anyhow::Error::msg)?;

    refresh(store).await?;

    let needle = id.to_lowercase();
    let matches: Vec<_> = store
        .pending_conflicts()
        .into_iter()
        .filter(|c| c.group_id.to_string().starts_with(&needle))
        .collect();

    let conflict = match matches.as_slice() {
        [] => bail!("No pending conflict matching: {}", id),
        [one] => one.clone(),
        _ => bail!("Ambiguous conflict ID. Please provide more characters."),
    };

    let group = store
        .resolve_conflict(conflict.group_id, resolution)
        .await
        .context("Failed to resolve conflict")?;

    let kept = match resolution {
        Resolution::KeepLocal => "local",
        Resolution::KeepRemote => "remote",
    };
    output.success(&format!(
        "Resolved {} ({}) keeping the {} copy",
        short_id(&group.id.to_string()),
        group.name,
        kept
    ));
    Ok(())
}
