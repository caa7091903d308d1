//! tokenkeep core - session lifecycle management for applications with many
//! concurrent consumers of a single bearer-token session.
//!
//! The entry point is [`SessionStore`]: construct one per process, call
//! [`SessionStore::hydrate`] once at startup, and hand clones of it to every
//! component that needs a session.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod storage;
pub mod store;

pub use api::{ApiError, AuthApi, HttpAuthApi};
pub use auth::{Credentials, Session};
pub use config::{Config, StorageBackend};
pub use error::SessionError;
pub use models::{Profile, ProfileUpdate};
pub use storage::{EncryptedFileStore, KeyringStore, MemoryStore, SecureStore, StorageError};
pub use store::{SessionStore, StoreOptions, StoreState};
