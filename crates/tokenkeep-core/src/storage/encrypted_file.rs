//! File-backed secure store for devices without a usable keychain.
//!
//! Each key is stored as `<dir>/<key>.bin` containing `nonce || ciphertext`,
//! sealed with ChaCha20-Poly1305. The encryption key is derived once per
//! store with Argon2id from a passphrase and a random salt kept in
//! `<dir>/salt`. The key name is bound as associated data, so a record copied
//! under another name fails to open.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use argon2::Argon2;
use async_trait::async_trait;
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::RngCore;
use tokio::sync::OnceCell;
use tracing::debug;

use super::{SecureStore, StorageError};

const SALT_FILE: &str = "salt";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;
const RECORD_EXTENSION: &str = "bin";

pub struct EncryptedFileStore {
    dir: PathBuf,
    passphrase: String,
    key: OnceCell<[u8; KEY_LEN]>,
}

impl std::fmt::Debug for EncryptedFileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedFileStore")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

impl EncryptedFileStore {
    pub fn new(dir: impl Into<PathBuf>, passphrase: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            passphrase: passphrase.into(),
            key: OnceCell::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid || key == SALT_FILE {
            return Err(StorageError::Io(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("invalid storage key: {:?}", key),
            )));
        }
        Ok(self.dir.join(format!("{}.{}", key, RECORD_EXTENSION)))
    }

    async fn cipher_key(&self) -> Result<[u8; KEY_LEN], StorageError> {
        self.key
            .get_or_try_init(|| {
                let dir = self.dir.clone();
                let passphrase = self.passphrase.clone();
                blocking(move || load_or_create_key(&dir, &passphrase))
            })
            .await
            .copied()
    }
}

async fn blocking<T, F>(op: F) -> Result<T, StorageError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StorageError> + Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?
}

fn load_or_create_key(dir: &Path, passphrase: &str) -> Result<[u8; KEY_LEN], StorageError> {
    fs::create_dir_all(dir)?;
    let salt_path = dir.join(SALT_FILE);
    let salt = match fs::read(&salt_path) {
        Ok(salt) if salt.len() == SALT_LEN => salt,
        Ok(_) => return Err(StorageError::Crypto("salt file is corrupt".to_string())),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            let mut salt = vec![0u8; SALT_LEN];
            rand::thread_rng().fill_bytes(&mut salt);
            fs::write(&salt_path, &salt)?;
            debug!(dir = %dir.display(), "Created new storage salt");
            salt
        }
        Err(e) => return Err(e.into()),
    };
    derive_key(passphrase.as_bytes(), &salt)
}

fn derive_key(passphrase: &[u8], salt: &[u8]) -> Result<[u8; KEY_LEN], StorageError> {
    let mut key = [0u8; KEY_LEN];
    Argon2::default()
        .hash_password_into(passphrase, salt, &mut key)
        .map_err(|e| StorageError::Crypto(format!("Argon2 key derivation failed: {e}")))?;
    Ok(key)
}

fn seal(key: &[u8; KEY_LEN], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, StorageError> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));

    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| StorageError::Crypto("encryption failed".to_string()))?;

    let mut sealed = nonce.to_vec();
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

fn open_sealed(key: &[u8; KEY_LEN], aad: &[u8], sealed: &[u8]) -> Result<Vec<u8>, StorageError> {
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(StorageError::Crypto("record is truncated".to_string()));
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| StorageError::Crypto("decryption failed (wrong passphrase or tampered record)".to_string()))
}

#[async_trait]
impl SecureStore for EncryptedFileStore {
    async fn is_available(&self) -> bool {
        let dir = self.dir.clone();
        let probe = blocking(move || {
            fs::create_dir_all(&dir)?;
            let probe = dir.join(".probe");
            fs::write(&probe, b"ok")?;
            fs::remove_file(&probe)?;
            Ok(())
        })
        .await;
        match probe {
            Ok(()) => true,
            Err(e) => {
                debug!(dir = %self.dir.display(), error = %e, "Storage directory is not writable");
                false
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.record_path(key)?;
        let cipher_key = self.cipher_key().await?;
        let aad = key.as_bytes().to_vec();
        blocking(move || {
            let sealed = match fs::read(&path) {
                Ok(sealed) => sealed,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(e.into()),
            };
            let plaintext = open_sealed(&cipher_key, &aad, &sealed)?;
            String::from_utf8(plaintext)
                .map(Some)
                .map_err(|_| StorageError::Crypto("record is not valid UTF-8".to_string()))
        })
        .await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.record_path(key)?;
        let cipher_key = self.cipher_key().await?;
        let sealed = seal(&cipher_key, key.as_bytes(), value.as_bytes())?;
        blocking(move || {
            // Write then rename so a crash never leaves a half-written record
            let tmp = path.with_extension("tmp");
            fs::write(&tmp, &sealed)?;
            fs::rename(&tmp, &path)?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.record_path(key)?;
        blocking(move || match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = EncryptedFileStore::new(dir.path(), "correct horse");

        assert!(store.is_available().await);
        assert_eq!(store.get("session").await.unwrap(), None);

        store.set("session", r#"{"accessToken":"t"}"#).await.unwrap();
        assert_eq!(
            store.get("session").await.unwrap().as_deref(),
            Some(r#"{"accessToken":"t"}"#)
        );

        store.delete("session").await.unwrap();
        assert_eq!(store.get("session").await.unwrap(), None);
        // Deleting twice is fine
        store.delete("session").await.unwrap();
    }

    #[tokio::test]
    async fn test_records_are_not_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let store = EncryptedFileStore::new(dir.path(), "pass");
        store.set("credentials", "hunter2-secret").await.unwrap();

        let raw = fs::read(dir.path().join("credentials.bin")).unwrap();
        let needle = b"hunter2-secret";
        assert!(!raw.windows(needle.len()).any(|w| w == needle));
    }

    #[tokio::test]
    async fn test_reopen_with_same_passphrase() {
        let dir = tempfile::tempdir().unwrap();
        EncryptedFileStore::new(dir.path(), "pass")
            .set("session", "value")
            .await
            .unwrap();

        let reopened = EncryptedFileStore::new(dir.path(), "pass");
        assert_eq!(reopened.get("session").await.unwrap().as_deref(), Some("value"));

        let wrong = EncryptedFileStore::new(dir.path(), "other");
        assert!(matches!(
            wrong.get("session").await,
            Err(StorageError::Crypto(_))
        ));
    }

    #[tokio::test]
    async fn test_record_bound_to_key_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = EncryptedFileStore::new(dir.path(), "pass");
        store.set("session", "value").await.unwrap();
        fs::copy(
            dir.path().join("session.bin"),
            dir.path().join("credentials.bin"),
        )
        .unwrap();

        assert!(store.get("credentials").await.is_err());
    }

    #[test]
    fn test_rejects_path_like_keys() {
        let store = EncryptedFileStore::new("/tmp/unused", "pass");
        assert!(store.record_path("../etc/passwd").is_err());
        assert!(store.record_path("salt").is_err());
        assert!(store.record_path("").is_err());
        assert!(store.record_path("session").is_ok());
    }
}
