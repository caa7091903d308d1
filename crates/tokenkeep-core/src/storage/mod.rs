//! Secure key-value storage for the persisted session and credentials.
//!
//! The session store only ever touches two keys, each holding a JSON record.
//! Backends:
//! - `KeyringStore`: OS keychain via the `keyring` crate
//! - `EncryptedFileStore`: ChaCha20-Poly1305 encrypted files, Argon2id key
//! - `MemoryStore`: in-process map, for tests and memory-only deployments

pub mod encrypted_file;
pub mod keychain;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

pub use encrypted_file::EncryptedFileStore;
pub use keychain::KeyringStore;
pub use memory::MemoryStore;

/// Key holding the serialized `Session`.
pub const SESSION_KEY: &str = "session";

/// Key holding the serialized `Credentials`.
pub const CREDENTIALS_KEY: &str = "credentials";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Secure storage is not available on this device")]
    Unavailable,

    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encryption error: {0}")]
    Crypto(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage task failed: {0}")]
    Task(String),
}

/// Scoped get/set/delete of opaque string blobs.
#[async_trait]
pub trait SecureStore: Send + Sync {
    /// Probe whether this backend can be used on the current device.
    async fn is_available(&self) -> bool;

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Removing a key that does not exist is not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}
