//! Authentication value types.
//!
//! This module provides:
//! - `Session`: the bearer token pair issued by a successful login
//! - `Credentials`: the username/password pair kept for silent reauthentication
//!
//! Both are plain values; persistence and sharing live in `crate::store`.

pub mod credentials;
pub mod session;

pub use credentials::Credentials;
pub use session::Session;
