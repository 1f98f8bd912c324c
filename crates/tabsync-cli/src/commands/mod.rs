//! Command handlers, one module per subcommand group

pub mod config;
pub mod conflicts;
pub mod group;
pub mod status;
pub mod sync;
pub mod tab;

use std::io::{self, IsTerminal, Write};

use anyhow::{bail, Result};
use uuid::Uuid;

use tabsync_core::{Store, TabGroup};

use crate::output::short_id;

/// Resolve a group by full id, id prefix, or exact name
pub async fn resolve_group(store: &Store, needle: &str) -> Result<TabGroup> {
    if let Ok(id) = Uuid::parse_str(needle) {
        return Ok(store.group(id).await?);
    }

    let mut matches = store.find_groups(needle).await?;
    match matches.len() {
        0 => bail!("No tab group found matching: {}", needle),
        1 => Ok(matches.remove(0)),
        _ => {
            eprintln!("Multiple groups match '{}':", needle);
            for group in &matches {
                eprintln!("  {} - {}", group.id, group.name);
            }
            bail!("Ambiguous group. Please provide more characters of the ID.");
        }
    }
}

/// Resolve a tab inside `group` by full id or id prefix
pub fn resolve_tab(group: &TabGroup, needle: &str) -> Result<Uuid> {
    let needle = needle.to_lowercase();
    let matches: Vec<_> = group
        .tabs
        .iter()
        .filter(|t| t.id.to_string().starts_with(&needle))
        .collect();

    match matches.len() {
        0 => bail!("No tab matching '{}' in group {}", needle, short_id(&group.id.to_string())),
        1 => Ok(matches[0].id),
        _ => {
            eprintln!("Multiple tabs match '{}':", needle);
            for tab in &matches {
                eprintln!("  {} - {}", tab.id, tab.url);
            }
            bail!("Ambiguous tab. Please provide more characters of the ID.");
        }
    }
}

/// Ask a yes/no question; non-interactive stdin counts as "no"
pub fn confirm(prompt: &str) -> Result<bool> {
    if !io::stdin().is_terminal() {
        return Ok(false);
    }

    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    let input = input.trim().to_lowercase();
    Ok(input == "y" || input == "yes")
}
