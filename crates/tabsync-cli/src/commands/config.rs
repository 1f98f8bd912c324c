//! Config command handlers

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use tabsync_core::{Config, ConflictStrategy};

use crate::output::{Output, OutputFormat};

const VALID_KEYS: &str =
    "data_dir, user_id, remote_url, realtime_url, auth_token, sync_enabled, conflict_strategy, log_file";

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "data_dir": config.data_dir,
                    "user_id": config.user_id,
                    "remote_url": config.remote_url,
                    "realtime_url": config.realtime_url,
                    "auth_token": config.auth_token.as_ref().map(|_| "(set)"),
                    "sync_enabled": config.sync_enabled,
                    "conflict_strategy": config.conflict_strategy,
                    "log_file": config.log_file
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            println!("Configuration:");
            println!("  data_dir:          {}", config.data_dir.display());
            println!("  user_id:           {}", or_unset(config.user_id.as_deref()));
            println!("  remote_url:        {}", or_unset(config.remote_url.as_deref()));
            println!("  realtime_url:      {}", or_unset(config.realtime_url.as_deref()));
            println!(
                "  auth_token:        {}",
                if config.auth_token.is_some() {
                    "(set)"
                } else {
                    "(not set)"
                }
            );
            println!("  sync_enabled:      {}", config.sync_enabled);
            println!("  conflict_strategy: {}", config.conflict_strategy);
            println!(
                "  log_file:          {}",
                config
                    .log_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(
    key: String,
    value: String,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match key.as_str() {
        "data_dir" => {
            config.data_dir = value.clone().into();
        }
        "user_id" => config.user_id = optional(&value),
        "remote_url" => config.remote_url = optional(&value),
        "realtime_url" => config.realtime_url = optional(&value),
        "auth_token" => config.auth_token = optional(&value),
        "sync_enabled" => {
            config.sync_enabled = value
                .parse()
                .context("Invalid value for sync_enabled. Use 'true' or 'false'.")?;
        }
        "conflict_strategy" => {
            config.conflict_strategy = value
                .parse::<ConflictStrategy>()
                .map_err(anyhow::Error::msg)
                .context("Use one of: newest, local, remote, ask")?;
        }
        "log_file" => config.log_file = optional(&value).map(PathBuf::from),
        _ => {
            bail!(
                "Unknown configuration key: '{}'\n\
                 Valid keys: {}",
                key,
                VALID_KEYS
            );
        }
    }

    let save_path = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    // Never echo a credential back
    let shown = if key == "auth_token" { "(set)" } else { value.as_str() };
    output.success(&format!("Set {} = {}", key, shown));

    Ok(())
}

/// Empty or "none" clears an optional value
fn optional(value: &str) -> Option<String> {
    if value.is_empty() || value == "none" {
        None
    } else {
        Some(value.to_string())
    }
}

fn or_unset(value: Option<&str>) -> &str {
    value.unwrap_or("(not set)")
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Config file whose data_dir points inside the temp dir
    fn seeded_config(temp: &tempfile::TempDir) -> PathBuf {
        let path = temp.path().join("config.toml");
        let config = Config {
            data_dir: temp.path().join("data"),
            ..Config::default()
        };
        config.save_to_path(&path).unwrap();
        path
    }

    #[test]
    fn test_optional_clears_on_none() {
        assert_eq!(optional(""), None);
        assert_eq!(optional("none"), None);
        assert_eq!(
            optional("https://sync.example.com").as_deref(),
            Some("https://sync.example.com")
        );
    }

    #[test]
    fn test_set_persists_value() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = seeded_config(&temp);
        let output = Output::new(OutputFormat::Quiet);

        set("conflict_strategy".to_string(), "ask".to_string(), Some(&path), &output).unwrap();
        set("log_file".to_string(), "/tmp/tabsync.log".to_string(), Some(&path), &output).unwrap();

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.conflict_strategy, ConflictStrategy::Ask);
        assert_eq!(config.log_file, Some(PathBuf::from("/tmp/tabsync.log")));
    }

    #[test]
    fn test_set_rejects_unknown_key() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = seeded_config(&temp);
        let output = Output::new(OutputFormat::Quiet);

        let err = set("favorite_color".to_string(), "blue".to_string(), Some(&path), &output)
            .unwrap_err();
        assert!(err.to_string().contains("Unknown configuration key"));
    }

    #[test]
    fn test_set_rejects_bad_strategy() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = seeded_config(&temp);
        let output = Output::new(OutputFormat::Quiet);

        let result = set("conflict_strategy".to_string(), "coinflip".to_string(), Some(&path), &output);
        assert!(result.is_err());
    }
}
