//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/tabsync/config.toml)
//! 3. Environment variables (TABSYNC_* prefix)
//!
//! Environment variables take precedence over config file values.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::sync::ConflictStrategy;

/// Environment variable prefix
const ENV_PREFIX: &str = "TABSYNC";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for data storage (group file, device id)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Account the groups belong to
    #[serde(default)]
    pub user_id: Option<String>,

    /// Base URL of the HTTP backend (optional)
    #[serde(default)]
    pub remote_url: Option<String>,

    /// Websocket URL of the change feed (optional)
    #[serde(default)]
    pub realtime_url: Option<String>,

    /// Bearer token; sync is signed-out without one
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Whether sync is enabled
    #[serde(default)]
    pub sync_enabled: bool,

    /// How concurrent edits are reconciled
    #[serde(default)]
    pub conflict_strategy: ConflictStrategy,

    /// How long a local deletion blocks realtime pulls (milliseconds)
    #[serde(default = "default_pending_deletion_ttl_ms")]
    pub pending_deletion_ttl_ms: u64,

    /// Optional log file for the CLI
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Scheduler timing
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Realtime listener timing
    #[serde(default)]
    pub realtime: RealtimeConfig,
}

/// Debounce and retry settings for network passes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Base debounce window
    pub debounce_ms: u64,
    /// Shortened delay for high-priority requests
    pub high_priority_delay_ms: u64,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// First backoff delay
    pub retry_base_ms: u64,
    /// Backoff ceiling
    pub retry_cap_ms: u64,
    /// Randomize backoff delays
    pub jitter: bool,
    /// Per-attempt network timeout
    pub request_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 300,
            high_priority_delay_ms: 100,
            max_retries: 3,
            retry_base_ms: 1000,
            retry_cap_ms: 10_000,
            jitter: false,
            request_timeout_ms: 5000,
        }
    }
}

impl SchedulerConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn high_priority_delay(&self) -> Duration {
        Duration::from_millis(self.high_priority_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Reconnect, heartbeat and debounce settings for the change feed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Quiet period after the last remote event before pulling
    pub debounce_ms: u64,
    /// First reconnect delay
    pub base_delay_ms: u64,
    /// Growth factor per attempt
    pub backoff_multiplier: f64,
    /// Reconnect delay ceiling
    pub max_delay_ms: u64,
    /// Reconnect attempts before giving up
    pub max_attempts: u32,
    /// Randomize reconnect delays
    pub jitter: bool,
    /// Heartbeat period while connected
    pub heartbeat_interval_ms: u64,
    /// Heartbeat deadline
    pub heartbeat_timeout_ms: u64,
    /// Consecutive heartbeat failures before `unstable`
    pub unstable_after: u32,
    /// Consecutive heartbeat failures before `offline`
    pub offline_after: u32,
    /// Bounded event channel size
    pub channel_capacity: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            base_delay_ms: 1000,
            backoff_multiplier: 2.0,
            max_delay_ms: 30_000,
            max_attempts: 10,
            jitter: true,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 5000,
            unstable_after: 3,
            offline_after: 5,
            channel_capacity: 64,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            user_id: None,
            remote_url: None,
            realtime_url: None,
            auth_token: None,
            sync_enabled: false,
            conflict_strategy: ConflictStrategy::default(),
            pending_deletion_ttl_ms: default_pending_deletion_ttl_ms(),
            log_file: None,
            scheduler: SchedulerConfig::default(),
            realtime: RealtimeConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (TABSYNC_DATA_DIR, TABSYNC_REMOTE_URL, ...)
    /// 2. Config file (~/.config/tabsync/config.toml or TABSYNC_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var(format!("{}_REMOTE_URL", ENV_PREFIX)) {
            self.remote_url = non_empty(val);
        }

        if let Ok(val) = std::env::var(format!("{}_REALTIME_URL", ENV_PREFIX)) {
            self.realtime_url = non_empty(val);
        }

        if let Ok(val) = std::env::var(format!("{}_AUTH_TOKEN", ENV_PREFIX)) {
            self.auth_token = non_empty(val);
        }

        if let Ok(val) = std::env::var(format!("{}_USER_ID", ENV_PREFIX)) {
            self.user_id = non_empty(val);
        }

        if let Ok(val) = std::env::var(format!("{}_SYNC_ENABLED", ENV_PREFIX)) {
            self.sync_enabled = val.eq_ignore_ascii_case("true") || val == "1";
        }
    }

    /// Ensure data directory exists
    fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Load from an explicit path when given, the default location otherwise
    pub fn load_with_cli_override(path: Option<&PathBuf>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    pub fn save_to_path(&self, config_path: &PathBuf) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with TABSYNC_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tabsync")
            .join("config.toml")
    }

    /// Get the path to the persisted group list
    pub fn groups_path(&self) -> PathBuf {
        self.data_dir.join("tab_groups.json")
    }

    /// Get the path to the device id file
    pub fn device_id_path(&self) -> PathBuf {
        self.data_dir.join("device_id")
    }

    /// Account id used to scope sync, `"local"` when unset
    pub fn effective_user_id(&self) -> String {
        self.user_id.clone().unwrap_or_else(|| "local".to_string())
    }

    pub fn pending_deletion_ttl(&self) -> Duration {
        Duration::from_millis(self.pending_deletion_ttl_ms)
    }
}

fn non_empty(val: String) -> Option<String> {
    if val.is_empty() {
        None
    } else {
        Some(val)
    }
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tabsync")
}

fn default_pending_deletion_ttl_ms() -> u64 {
    10_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that touch environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Guard that locks env access and saves/restores env vars
    struct EnvGuard<'a> {
        _lock: std::sync::MutexGuard<'a, ()>,
        saved: Vec<(String, Option<String>)>,
    }

    impl<'a> EnvGuard<'a> {
        fn new(vars: &[&str]) -> Self {
            let lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            let saved = vars
                .iter()
                .map(|&name| (name.to_string(), env::var(name).ok()))
                .collect();
            for name in vars {
                env::remove_var(name);
            }
            Self { _lock: lock, saved }
        }
    }

    impl Drop for EnvGuard<'_> {
        fn drop(&mut self) {
            for (name, value) in &self.saved {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    const ENV_VARS: &[&str] = &[
        "TABSYNC_DATA_DIR",
        "TABSYNC_REMOTE_URL",
        "TABSYNC_REALTIME_URL",
        "TABSYNC_AUTH_TOKEN",
        "TABSYNC_USER_ID",
        "TABSYNC_SYNC_ENABLED",
    ];

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(!config.sync_enabled);
        assert!(config.remote_url.is_none());
        assert!(config.data_dir.ends_with("tabsync"));
        assert_eq!(config.conflict_strategy, ConflictStrategy::Newest);
        assert_eq!(config.scheduler.debounce_ms, 300);
        assert_eq!(config.scheduler.high_priority_delay_ms, 100);
        assert_eq!(config.scheduler.max_retries, 3);
        assert_eq!(config.realtime.heartbeat_interval_ms, 30_000);
    }

    #[test]
    fn test_file_paths() {
        let config = Config::default();
        assert!(config.groups_path().ends_with("tab_groups.json"));
        assert!(config.device_id_path().ends_with("device_id"));
    }

    #[test]
    fn test_effective_user_id() {
        let mut config = Config::default();
        assert_eq!(config.effective_user_id(), "local");
        config.user_id = Some("user-42".to_string());
        assert_eq!(config.effective_user_id(), "user-42");
    }

    #[test]
    fn test_env_override_data_dir() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("TABSYNC_DATA_DIR", "/tmp/tabsync-test");
        config.apply_env_overrides();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/tabsync-test"));
    }

    #[test]
    fn test_env_override_sync_enabled() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("TABSYNC_SYNC_ENABLED", "true");
        config.apply_env_overrides();
        assert!(config.sync_enabled);

        env::set_var("TABSYNC_SYNC_ENABLED", "0");
        config.apply_env_overrides();
        assert!(!config.sync_enabled);
    }

    #[test]
    fn test_env_override_urls_and_token() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("TABSYNC_REMOTE_URL", "https://sync.example.com");
        env::set_var("TABSYNC_AUTH_TOKEN", "secret");
        config.apply_env_overrides();
        assert_eq!(config.remote_url.as_deref(), Some("https://sync.example.com"));
        assert_eq!(config.auth_token.as_deref(), Some("secret"));

        // Empty string clears it
        env::set_var("TABSYNC_AUTH_TOKEN", "");
        config.apply_env_overrides();
        assert!(config.auth_token.is_none());
    }

    #[test]
    fn test_load_from_str_with_nested_tables() {
        let _guard = EnvGuard::new(ENV_VARS);

        let toml = r#"
            data_dir = "/custom/data"
            remote_url = "https://example.com"
            sync_enabled = true
            conflict_strategy = "ask"

            [scheduler]
            debounce_ms = 250

            [realtime]
            max_attempts = 4
        "#;

        let config = Config::load_from_str(toml).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/custom/data"));
        assert!(config.sync_enabled);
        assert_eq!(config.conflict_strategy, ConflictStrategy::Ask);
        assert_eq!(config.scheduler.debounce_ms, 250);
        // Unset keys in a table keep their defaults
        assert_eq!(config.scheduler.max_retries, 3);
        assert_eq!(config.realtime.max_attempts, 4);
        assert_eq!(config.realtime.debounce_ms, 500);
    }

    #[test]
    fn test_serialization_round_trip() {
        let _guard = EnvGuard::new(ENV_VARS);

        let config = Config {
            data_dir: PathBuf::from("/data/tabsync"),
            remote_url: Some("https://sync.example.com".to_string()),
            sync_enabled: true,
            ..Config::default()
        };

        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("remote_url"));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.data_dir, config.data_dir);
        assert_eq!(parsed.remote_url, config.remote_url);
        assert_eq!(parsed.scheduler, config.scheduler);
    }

    #[test]
    fn test_load_from_path_missing_file() {
        let _guard = EnvGuard::new(ENV_VARS);
        let temp = tempfile::TempDir::new().unwrap();
        env::set_var("TABSYNC_DATA_DIR", temp.path().join("data"));

        let path = PathBuf::from("/nonexistent/config.toml");
        let config = Config::load_from_path(&path).unwrap();
        assert!(!config.sync_enabled);
        assert!(config.data_dir.exists());
    }

    #[test]
    fn test_save_to_path_and_reload() {
        let _guard = EnvGuard::new(ENV_VARS);
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.toml");

        let config = Config {
            data_dir: temp.path().join("data"),
            user_id: Some("alice".to_string()),
            conflict_strategy: ConflictStrategy::Ask,
            ..Config::default()
        };
        config.save_to_path(&path).unwrap();

        let loaded = Config::load_with_cli_override(Some(&path)).unwrap();
        assert_eq!(loaded.user_id.as_deref(), Some("alice"));
        assert_eq!(loaded.conflict_strategy, ConflictStrategy::Ask);
        assert_eq!(loaded.data_dir, temp.path().join("data"));
    }
}
