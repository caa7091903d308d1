//! Application configuration management.
//!
//! This module handles loading and saving the configuration, which selects
//! the API endpoint, the secure storage backend and the reauthentication
//! policy, and remembers the last username.
//!
//! Configuration is stored at `~/.config/tokenkeep/config.json`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::client::DEFAULT_REQUEST_TIMEOUT_SECS;
use crate::api::{AuthApi, HttpAuthApi};
use crate::storage::keychain::DEFAULT_SERVICE_NAME;
use crate::storage::{EncryptedFileStore, KeyringStore, MemoryStore, SecureStore};
use crate::store::StoreOptions;

/// Application name used for config/data directory paths
const APP_NAME: &str = "tokenkeep";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Subdirectory of the data dir holding encrypted records
const SECURE_DIR: &str = "secure";

const DEFAULT_API_BASE_URL: &str = "http://localhost:8080/api";

/// Where the session and credentials are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Keyring,
    EncryptedFile,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub storage: StorageBackend,
    pub keyring_service: String,
    pub reauth_cooldown_secs: u64,
    pub last_username: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            storage: StorageBackend::default(),
            keyring_service: DEFAULT_SERVICE_NAME.to_string(),
            reauth_cooldown_secs: 0,
            last_username: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory for the encrypted-file storage backend.
    pub fn data_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME).join(SECURE_DIR))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            reauth_cooldown: Duration::from_secs(self.reauth_cooldown_secs),
        }
    }

    pub fn build_api(&self) -> Result<Arc<dyn AuthApi>> {
        let api = HttpAuthApi::with_timeout(&self.api_base_url, self.request_timeout())
            .context("Failed to build HTTP client")?;
        Ok(Arc::new(api))
    }

    /// Build the configured storage backend. The encrypted-file backend needs
    /// a passphrase; without one it is an error rather than a silent downgrade.
    pub fn build_storage(&self, passphrase: Option<&str>) -> Result<Arc<dyn SecureStore>> {
        let storage: Arc<dyn SecureStore> = match self.storage {
            StorageBackend::Keyring => Arc::new(KeyringStore::new(&self.keyring_service)),
            StorageBackend::EncryptedFile => {
                let passphrase = passphrase.filter(|p| !p.is_empty()).ok_or_else(|| {
                    anyhow::anyhow!("The encrypted_file storage backend needs a passphrase")
                })?;
                Arc::new(EncryptedFileStore::new(self.data_dir()?, passphrase))
            }
            StorageBackend::Memory => Arc::new(MemoryStore::new()),
        };
        Ok(storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"storage":"encrypted_file","reauth_cooldown_secs":30}"#).unwrap();
        assert_eq!(config.storage, StorageBackend::EncryptedFile);
        assert_eq!(config.store_options().reauth_cooldown, Duration::from_secs(30));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.keyring_service, "tokenkeep");
    }

    #[test]
    fn test_encrypted_file_requires_passphrase() {
        let config = Config {
            storage: StorageBackend::EncryptedFile,
            ..Default::default()
        };
        assert!(config.build_storage(None).is_err());
        assert!(config.build_storage(Some("")).is_err());
    }

    #[test]
    fn test_memory_backend_builds() {
        let config = Config {
            storage: StorageBackend::Memory,
            ..Default::default()
        };
        assert!(config.build_storage(None).is_ok());
        assert!(config.build_api().is_ok());
    }
}
