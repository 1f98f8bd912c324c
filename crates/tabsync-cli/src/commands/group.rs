//! Tab group command handlers

use anyhow::{Context, Result};

use tabsync_core::{Store, Tab};

use super::{confirm, resolve_group};
use crate::output::{short_id, Output};

/// Create a new group, optionally seeded with tabs
pub async fn create(store: &Store, name: String, urls: Vec<String>, output: &Output) -> Result<()> {
    let tabs = urls.into_iter().map(Tab::new).collect();
    let group = store
        .create_group(&name, tabs)
        .await
        .context("Failed to create tab group")?;

    output.success(&format!("Created tab group: {}", group.id));
    if !output.is_quiet() {
        output.print_group(&group);
    }
    Ok(())
}

pub async fn list(store: &Store, output: &Output) -> Result<()> {
    let groups = store.groups().await?;
    output.print_groups(&groups);
    Ok(())
}

pub async fn show(store: &Store, id: String, output: &Output) -> Result<()> {
    let group = resolve_group(store, &id).await?;
    output.print_group(&group);
    Ok(())
}

pub async fn rename(store: &Store, id: String, name: String, output: &Output) -> Result<()> {
    let group = resolve_group(store, &id).await?;
    let renamed = store
        .rename_group(group.id, &name)
        .await
        .context("Failed to rename tab group")?;

    output.success(&format!("Renamed '{}' to '{}'", group.name, renamed.name));
    Ok(())
}

/// Lock or unlock a group
///
/// Locked groups are never removed by deduplication, even when emptied.
pub async fn set_locked(store: &Store, id: String, locked: bool, output: &Output) -> Result<()> {
    let group = resolve_group(store, &id).await?;
    store.set_locked(group.id, locked).await?;

    let verb = if locked { "Locked" } else { "Unlocked" };
    output.success(&format!("{} tab group: {}", verb, group.name));
    Ok(())
}

pub async fn delete(store: &Store, id: String, force: bool, output: &Output) -> Result<()> {
    let group = resolve_group(store, &id).await?;

    if output.should_prompt() && !force {
        println!(
            "Delete tab group: {} - {} ({} tab(s))",
            short_id(&group.id.to_string()),
            group.name,
            group.tabs.len()
        );
        if !confirm("Are you sure?")? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    store
        .delete_group(group.id)
        .await
        .context("Failed to delete tab group")?;

    output.success(&format!("Deleted tab group: {}", group.id));
    Ok(())
}

/// Move a group to a new position in the display order
pub async fn move_to(store: &Store, id: String, index: usize, output: &Output) -> Result<()> {
    let group = resolve_group(store, &id).await?;
    let ordered = store.move_group(group.id, index).await?;

    let position = ordered
        .iter()
        .position(|g| g.id == group.id)
        .unwrap_or(index);
    output.success(&format!("Moved '{}' to position {}", group.name, position));
    Ok(())
}

/// Remove duplicate tabs across all groups
///
/// The first occurrence in group creation order is kept. Unlocked groups
/// left empty are removed.
pub async fn dedup(store: &Store, output: &Output) -> Result<()> {
    let report = store
        .deduplicate()
        .await
        .context("Failed to deduplicate tabs")?;
    output.print_dedup_report(&report);
    Ok(())
}
