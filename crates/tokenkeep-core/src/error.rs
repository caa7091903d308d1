use thiserror::Error;

use crate::api::ApiError;

/// Errors surfaced by the user-facing session store operations
/// (`sign_in`, `refresh_profile`, `update_profile`). Background work never
/// returns these; it logs and degrades instead.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Login succeeded but the server returned no access token")]
    MissingToken,

    #[error("Not signed in")]
    NotSignedIn,
}

impl SessionError {
    /// HTTP status of the underlying API failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            SessionError::Api(e) => e.status(),
            _ => None,
        }
    }
}
