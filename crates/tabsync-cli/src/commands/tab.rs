//! Tab command handlers

use anyhow::{Context, Result};

use tabsync_core::{Store, Tab};

use super::{resolve_group, resolve_tab};
use crate::output::{short_id, Output};

pub async fn add(
    store: &Store,
    group: String,
    url: String,
    title: Option<String>,
    output: &Output,
) -> Result<()> {
    let group = resolve_group(store, &group).await?;

    let mut tab = Tab::new(url);
    if let Some(title) = title {
        tab = tab.with_title(title);
    }
    let tab_id = tab.id;

    let updated = store
        .add_tab(group.id, tab)
        .await
        .context("Failed to add tab")?;

    output.success(&format!("Added tab to '{}'", updated.name));
    if let Some(tab) = updated.tabs.iter().find(|t| t.id == tab_id) {
        output.print_tab(tab);
    }
    Ok(())
}

pub async fn delete(store: &Store, group: String, tab: String, output: &Output) -> Result<()> {
    let group = resolve_group(store, &group).await?;
    let tab_id = resolve_tab(&group, &tab)?;

    let updated = store
        .delete_tab(group.id, tab_id)
        .await
        .context("Failed to delete tab")?;

    output.success(&format!("Deleted tab: {}", tab_id));
    if updated.is_deleted {
        output.message(&format!(
            "Tab group '{}' was empty and has been removed",
            updated.name
        ));
    }
    Ok(())
}

/// Reorder a tab, or move it into another group when `to` is given
pub async fn move_to(
    store: &Store,
    group: String,
    tab: String,
    to: Option<String>,
    index: Option<usize>,
    output: &Output,
) -> Result<()> {
    let source = resolve_group(store, &group).await?;
    let tab_id = resolve_tab(&source, &tab)?;
    let target = match to {
        Some(ref needle) => resolve_group(store, needle).await?,
        None => source.clone(),
    };

    let touched = store
        .move_tab(tab_id, source.id, target.id, index)
        .await
        .context("Failed to move tab")?;

    if source.id == target.id {
        output.success(&format!("Moved tab {} within '{}'", short_id(&tab_id.to_string()), source.name));
    } else {
        output.success(&format!(
            "Moved tab {} from '{}' to '{}'",
            short_id(&tab_id.to_string()),
            source.name,
            target.name
        ));
        if touched.first().is_some_and(|g| g.is_deleted) {
            output.message(&format!(
                "Tab group '{}' was empty and has been removed",
                source.name
            ));
        }
    }
    Ok(())
}
