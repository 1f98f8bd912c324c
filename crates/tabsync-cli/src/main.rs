//! tabsync CLI
//!
//! Command-line interface for tabsync - tab groups kept in sync across devices.

use std::fs::OpenOptions;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tabsync_core::{Config, Store};

mod commands;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "tabsync")]
#[command(about = "tabsync - Local-first tab groups with multi-device sync")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Use a config file other than the default
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage tab groups
    Group {
        #[command(subcommand)]
        command: GroupCommands,
    },
    /// Manage tabs inside a group
    Tab {
        #[command(subcommand)]
        command: TabCommands,
    },
    /// Remove duplicate tabs across all groups
    Dedup,
    /// Sync with the remote backend now
    Sync,
    /// Stay connected and follow changes from other devices
    Watch,
    /// Review and resolve sync conflicts
    Conflicts {
        #[command(subcommand)]
        command: Option<ConflictCommands>,
    },
    /// Show status (device, sync state, counts)
    Status,
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum GroupCommands {
    /// Create a new tab group
    #[command(alias = "add")]
    Create {
        /// Group name
        name: String,
        /// URLs to open in the group
        #[arg(short, long)]
        url: Vec<String>,
    },
    /// List all tab groups
    #[command(alias = "ls")]
    List,
    /// Show a group and its tabs
    Show {
        /// Group ID (full UUID or prefix) or exact name
        id: String,
    },
    /// Rename a group
    Rename {
        /// Group ID (full UUID or prefix) or exact name
        id: String,
        /// New name
        name: String,
    },
    /// Protect a group from automatic removal
    Lock {
        /// Group ID (full UUID or prefix) or exact name
        id: String,
    },
    /// Allow automatic removal of a group when it empties
    Unlock {
        /// Group ID (full UUID or prefix) or exact name
        id: String,
    },
    /// Delete a group
    #[command(alias = "rm")]
    Delete {
        /// Group ID (full UUID or prefix) or exact name
        id: String,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
    /// Move a group to a new position
    Move {
        /// Group ID (full UUID or prefix) or exact name
        id: String,
        /// Zero-based target position
        index: usize,
    },
}

#[derive(Subcommand)]
enum TabCommands {
    /// Add a tab to a group
    Add {
        /// Group ID (full UUID or prefix) or exact name
        group: String,
        /// URL of the tab
        url: String,
        /// Tab title (defaults to the URL)
        #[arg(short = 'T', long)]
        title: Option<String>,
    },
    /// Remove a tab from a group
    #[command(alias = "rm")]
    Delete {
        /// Group ID (full UUID or prefix) or exact name
        group: String,
        /// Tab ID (full UUID or prefix)
        tab: String,
    },
    /// Reorder a tab or move it to another group
    Move {
        /// Group ID the tab is in
        group: String,
        /// Tab ID (full UUID or prefix)
        tab: String,
        /// Destination group (defaults to the same group)
        #[arg(long)]
        to: Option<String>,
        /// Zero-based position in the destination (defaults to the end)
        #[arg(long)]
        index: Option<usize>,
    },
}

#[derive(Subcommand)]
enum ConflictCommands {
    /// List conflicts awaiting a decision
    #[command(alias = "ls")]
    List,
    /// Resolve a conflict by keeping one copy
    Resolve {
        /// Group ID (full UUID or prefix)
        id: String,
        /// Which copy to keep: local or remote
        keep: String,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (data_dir, remote_url, sync_enabled, conflict_strategy, ...)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    // Config doesn't need the store
    if let Commands::Config { command } = &cli.command {
        return handle_config_command(command.clone(), cli.config.as_ref(), &output);
    }

    let config = Config::load_with_cli_override(cli.config.as_ref())?;
    init_logging(&config);

    let store = Store::open_with_config(config)?;

    let is_write = matches!(
        &cli.command,
        Commands::Group {
            command: GroupCommands::Create { .. }
                | GroupCommands::Rename { .. }
                | GroupCommands::Lock { .. }
                | GroupCommands::Unlock { .. }
                | GroupCommands::Delete { .. }
                | GroupCommands::Move { .. }
        } | Commands::Tab { .. }
            | Commands::Dedup
            | Commands::Conflicts {
                command: Some(ConflictCommands::Resolve { .. })
            }
    );

    let result = match cli.command {
        Commands::Group { command } => handle_group_command(command, &store, &output).await,
        Commands::Tab { command } => handle_tab_command(command, &store, &output).await,
        Commands::Dedup => commands::group::dedup(&store, &output).await,
        Commands::Sync => commands::sync::sync(&store, &output).await,
        Commands::Watch => commands::sync::watch(&store, &output).await,
        Commands::Conflicts { command } => {
            handle_conflict_command(command, &store, &output).await
        }
        Commands::Status => commands::status::show(&store, &output).await,
        Commands::Config { .. } => unreachable!(), // Handled above
    };

    // Push changes before the process exits
    if is_write && result.is_ok() {
        commands::sync::flush_pending(&store, &output).await;
    }

    result
}

async fn handle_group_command(command: GroupCommands, store: &Store, output: &Output) -> Result<()> {
    match command {
        GroupCommands::Create { name, url } => commands::group::create(store, name, url, output).await,
        GroupCommands::List => commands::group::list(store, output).await,
        GroupCommands::Show { id } => commands::group::show(store, id, output).await,
        GroupCommands::Rename { id, name } => commands::group::rename(store, id, name, output).await,
        GroupCommands::Lock { id } => commands::group::set_locked(store, id, true, output).await,
        GroupCommands::Unlock { id } => commands::group::set_locked(store, id, false, output).await,
        GroupCommands::Delete { id, force } => {
            commands::group::delete(store, id, force, output).await
        }
        GroupCommands::Move { id, index } => commands::group::move_to(store, id, index, output).await,
    }
}

async fn handle_tab_command(command: TabCommands, store: &Store, output: &Output) -> Result<()> {
    match command {
        TabCommands::Add { group, url, title } => {
            commands::tab::add(store, group, url, title, output).await
        }
        TabCommands::Delete { group, tab } => commands::tab::delete(store, group, tab, output).await,
        TabCommands::Move {
            group,
            tab,
            to,
            index,
        } => commands::tab::move_to(store, group, tab, to, index, output).await,
    }
}

async fn handle_conflict_command(
    command: Option<ConflictCommands>,
    store: &Store,
    output: &Output,
) -> Result<()> {
    match command {
        Some(ConflictCommands::List) | None => commands::conflicts::list(store, output).await,
        Some(ConflictCommands::Resolve { id, keep }) => {
            commands::conflicts::resolve(store, id, keep, output).await
        }
    }
}

fn handle_config_command(
    command: Option<ConfigCommands>,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(config_path, output),
        Some(ConfigCommands::Set { key, value }) => {
            commands::config::set(key, value, config_path, output)
        }
    }
}

/// Initialize logging
///
/// Only initializes if TABSYNC_LOG is set. Logs to `config.log_file` when
/// configured, stderr otherwise.
fn init_logging(config: &Config) {
    let Ok(log_level) = std::env::var("TABSYNC_LOG") else {
        return;
    };

    let env_filter = EnvFilter::new(format!(
        "tabsync_core={},tabsync_cli={}",
        log_level, log_level
    ));

    let Some(ref log_path) = config.log_file else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init();
        return;
    };

    let log_file = match OpenOptions::new().create(true).append(true).open(log_path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Warning: Could not open log file {:?}: {}", log_path, e);
            return;
        }
    };

    // Ignore the error if a subscriber is already installed
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(log_file)
        .try_init();

    info!("Logging initialized to {:?}", log_path);
}
