use async_trait::async_trait;
use keyring::Entry;
use tracing::debug;

use super::{SecureStore, StorageError};

/// Default keychain service name.
pub const DEFAULT_SERVICE_NAME: &str = "tokenkeep";

/// Account name used when probing whether the keychain answers at all.
const PROBE_ACCOUNT: &str = "__availability_probe__";

/// OS keychain backend. Each key becomes one keychain entry under `service`.
#[derive(Debug, Clone)]
pub struct KeyringStore {
    service: String,
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new(DEFAULT_SERVICE_NAME)
    }
}

impl KeyringStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Keychain calls block, so they run on the blocking pool.
    async fn with_entry<T, F>(&self, key: &str, op: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(Entry) -> Result<T, keyring::Error> + Send + 'static,
    {
        let service = self.service.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || {
            let entry = Entry::new(&service, &key)?;
            op(entry)
        })
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?
        .map_err(StorageError::from)
    }
}

#[async_trait]
impl SecureStore for KeyringStore {
    async fn is_available(&self) -> bool {
        let probe = self
            .with_entry(PROBE_ACCOUNT, |entry| match entry.get_password() {
                Ok(_) | Err(keyring::Error::NoEntry) => Ok(()),
                Err(e) => Err(e),
            })
            .await;
        match probe {
            Ok(()) => true,
            Err(e) => {
                debug!(service = %self.service, error = %e, "Keychain probe failed");
                false
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.with_entry(key, |entry| match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e),
        })
        .await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let value = value.to_string();
        self.with_entry(key, move |entry| entry.set_password(&value))
            .await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.with_entry(key, |entry| match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_service_name() {
        assert_eq!(KeyringStore::default().service(), "tokenkeep");
        assert_eq!(KeyringStore::new("shop-app").service(), "shop-app");
    }
}
