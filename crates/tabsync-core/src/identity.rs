//! Device identity and sign-in state
//!
//! Every write is stamped with the id of the device that made it. The id is
//! generated once per install and persisted in the data directory, so the
//! realtime listener can recognise (and drop) notifications caused by this
//! device's own uploads.
//!
//! Sync is opt-in: [`AuthStatus`] gates every network-facing pass.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use tracing::info;

use crate::config::Config;

/// Stable per-install device identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    device_id: String,
}

impl DeviceIdentity {
    /// Load the persisted device id, generating and saving one if absent
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read device id from {:?}", path))?;
            let device_id = content.trim().to_string();
            if !device_id.is_empty() {
                return Ok(Self { device_id });
            }
        }

        let identity = Self::generate();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }
        std::fs::write(path, &identity.device_id)
            .with_context(|| format!("Failed to save device id to {:?}", path))?;
        info!(device_id = %identity.device_id, "Generated new device identity");

        Ok(identity)
    }

    /// Load the identity for the configured data directory
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::load_or_create(&config.device_id_path())
    }

    /// Fresh random identity (not persisted)
    pub fn generate() -> Self {
        Self {
            device_id: format!("device-{}", uuid::Uuid::new_v4()),
        }
    }

    /// Use a fixed id (tests, embedding)
    pub fn from_id(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
        }
    }

    pub fn current_device_id(&self) -> &str {
        &self.device_id
    }
}

/// Whether the user is signed in
pub trait AuthStatus: Send + Sync {
    fn is_authenticated(&self) -> bool;
}

/// Mutable sign-in flag
#[derive(Debug, Default)]
pub struct SessionAuth {
    authenticated: AtomicBool,
}

impl SessionAuth {
    pub fn new(authenticated: bool) -> Self {
        Self {
            authenticated: AtomicBool::new(authenticated),
        }
    }

    /// Signed in when sync is enabled and a token is configured
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.sync_enabled && config.auth_token.is_some())
    }

    pub fn set_authenticated(&self, authenticated: bool) {
        self.authenticated.store(authenticated, Ordering::SeqCst);
    }
}

impl AuthStatus for SessionAuth {
    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_generates_and_persists() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("device_id");

        let first = DeviceIdentity::load_or_create(&path).unwrap();
        assert!(first.current_device_id().starts_with("device-"));
        assert!(path.exists());

        // Simulates restart
        let second = DeviceIdentity::load_or_create(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_file_regenerates() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("device_id");
        std::fs::write(&path, "  \n").unwrap();

        let identity = DeviceIdentity::load_or_create(&path).unwrap();
        assert!(!identity.current_device_id().is_empty());
        let stored = std::fs::read_to_string(&path).unwrap();
        assert_eq!(stored, identity.current_device_id());
    }

    #[test]
    fn test_generated_ids_differ() {
        assert_ne!(DeviceIdentity::generate(), DeviceIdentity::generate());
    }

    #[test]
    fn test_session_auth() {
        let auth = SessionAuth::new(false);
        assert!(!auth.is_authenticated());
        auth.set_authenticated(true);
        assert!(auth.is_authenticated());
    }

    #[test]
    fn test_session_auth_from_config() {
        let mut config = Config::default();
        assert!(!SessionAuth::from_config(&config).is_authenticated());

        config.sync_enabled = true;
        assert!(!SessionAuth::from_config(&config).is_authenticated());

        config.auth_token = Some("token".to_string());
        assert!(SessionAuth::from_config(&config).is_authenticated());
    }
}
