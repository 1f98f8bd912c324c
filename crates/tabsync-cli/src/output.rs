//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use serde::Serialize;

use tabsync_core::sync::{DedupReport, PendingConflict, SyncReport};
use tabsync_core::{Tab, TabGroup};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    /// Print a single group with its tabs
    pub fn print_group(&self, group: &TabGroup) {
        match self.format {
            OutputFormat::Human => {
                println!("ID:       {}", group.id);
                println!("Name:     {}", group.name);
                println!("Version:  {}", group.version);
                println!("Status:   {}", group.sync_status);
                if group.is_locked {
                    println!("Locked:   yes");
                }
                println!("Created:  {}", group.created_at.format("%Y-%m-%d %H:%M"));
                println!("Updated:  {}", group.updated_at.format("%Y-%m-%d %H:%M"));
                if let Some(at) = group.last_synced_at {
                    println!("Synced:   {}", at.format("%Y-%m-%d %H:%M"));
                }

                println!();
                println!("── Tabs ({}) ──", group.tabs.len());
                for (index, tab) in group.tabs.iter().enumerate() {
                    println!("{:>3}. {}", index, tab_line(tab));
                }
            }
            OutputFormat::Json => print_json(group),
            OutputFormat::Quiet => println!("{}", group.id),
        }
    }

    /// Print a list of groups in display order
    pub fn print_groups(&self, groups: &[TabGroup]) {
        match self.format {
            OutputFormat::Human => {
                if groups.is_empty() {
                    println!("No tab groups found.");
                    return;
                }
                for group in groups {
                    let lock = if group.is_locked { " [locked]" } else { "" };
                    println!(
                        "{} | {}{} | {} tab(s) | {}",
                        short_id(&group.id.to_string()),
                        truncate(&group.name, 30),
                        lock,
                        group.tabs.len(),
                        group.sync_status
                    );
                }
                println!("\n{} group(s)", groups.len());
            }
            OutputFormat::Json => print_json(&groups),
            OutputFormat::Quiet => {
                for group in groups {
                    println!("{}", group.id);
                }
            }
        }
    }

    /// Print a single tab
    pub fn print_tab(&self, tab: &Tab) {
        match self.format {
            OutputFormat::Human => println!("{}", tab_line(tab)),
            OutputFormat::Json => print_json(tab),
            OutputFormat::Quiet => println!("{}", tab.id),
        }
    }

    /// Print conflicts awaiting a decision
    pub fn print_conflicts(&self, conflicts: &[PendingConflict]) {
        match self.format {
            OutputFormat::Human => {
                if conflicts.is_empty() {
                    println!("No pending conflicts.");
                    return;
                }
                for conflict in conflicts {
                    println!(
                        "{} | {}",
                        short_id(&conflict.group_id.to_string()),
                        truncate(&conflict.local.name, 30)
                    );
                    println!(
                        "    local:  v{} {} tab(s), updated {}",
                        conflict.local.version,
                        conflict.local.tabs.len(),
                        conflict.local.updated_at.format("%Y-%m-%d %H:%M:%S")
                    );
                    println!(
                        "    remote: v{} {} tab(s), updated {} on {}",
                        conflict.remote.version,
                        conflict.remote.tabs.len(),
                        conflict.remote.updated_at.format("%Y-%m-%d %H:%M:%S"),
                        conflict.remote.device_id
                    );
                }
                println!("\n{} conflict(s)", conflicts.len());
            }
            OutputFormat::Json => print_json(&conflicts),
            OutputFormat::Quiet => {
                for conflict in conflicts {
                    println!("{}", conflict.group_id);
                }
            }
        }
    }

    pub fn print_dedup_report(&self, report: &DedupReport) {
        match self.format {
            OutputFormat::Human => {
                if report.removed_count == 0 {
                    println!("✓ No duplicate tabs found");
                    return;
                }
                println!(
                    "✓ Removed {} duplicate tab(s) from {} group(s)",
                    report.removed_count,
                    report.changed_group_ids.len() + report.dropped_group_ids.len()
                );
                if !report.dropped_group_ids.is_empty() {
                    println!("  {} empty group(s) removed", report.dropped_group_ids.len());
                }
            }
            OutputFormat::Json => print_json(report),
            OutputFormat::Quiet => println!("{}", report.removed_count),
        }
    }

    pub fn print_sync_report(&self, report: &SyncReport) {
        match self.format {
            OutputFormat::Human => {
                if report.skipped {
                    println!("Sync skipped (signed out or another sync is running)");
                    return;
                }
                println!("✓ Sync complete");
                println!(
                    "  Merged: {}, Conflicts: {}, Uploaded: {}",
                    report.merged, report.conflicts, report.uploaded
                );
            }
            OutputFormat::Json => print_json(report),
            OutputFormat::Quiet => {}
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Check if we should prompt for confirmation
    pub fn should_prompt(&self) -> bool {
        self.format == OutputFormat::Human
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to serialize output: {}", e),
    }
}

fn tab_line(tab: &Tab) -> String {
    if tab.title.is_empty() || tab.title == tab.url {
        format!("{} {}", short_id(&tab.id.to_string()), truncate(&tab.url, 60))
    } else {
        format!(
            "{} {} | {}",
            short_id(&tab.id.to_string()),
            truncate(&tab.title, 35),
            truncate(&tab.url, 45)
        )
    }
}

pub fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

/// Truncate a string to max characters, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_flags() {
        assert_eq!(OutputFormat::from_flags(false, false), OutputFormat::Human);
        assert_eq!(OutputFormat::from_flags(true, false), OutputFormat::Json);
        assert_eq!(OutputFormat::from_flags(false, true), OutputFormat::Quiet);
        // Quiet takes precedence
        assert_eq!(OutputFormat::from_flags(true, true), OutputFormat::Quiet);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a long string", 10), "this is...");
    }

    #[test]
    fn test_truncate_multibyte() {
        assert_eq!(truncate("ünïcödé tïtlé", 8), "ünïcö...");
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0123456789abcdef"), "01234567");
        assert_eq!(short_id("abc"), "abc");
    }

    #[test]
    fn test_tab_line_hides_redundant_title() {
        let tab = Tab::new("https://example.com");
        let line = tab_line(&tab);
        assert!(line.ends_with("https://example.com"));
        assert!(!line.contains('|'));

        let titled = Tab::new("https://example.com").with_title("Example");
        assert!(tab_line(&titled).contains("Example | https://example.com"));
    }
}
