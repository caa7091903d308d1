//! REST client module for the auth backend.
//!
//! This module provides the `AuthApi` trait the session store depends on and
//! `HttpAuthApi`, its reqwest implementation. Every call fails with an
//! `ApiError` that carries the HTTP status when the server answered.

pub mod client;
pub mod error;

pub use client::{AuthApi, HttpAuthApi};
pub use error::ApiError;
