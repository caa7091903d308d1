use std::fmt;

use serde::{Deserialize, Serialize};

/// Username/password pair retained so an expired session can be renewed
/// without asking the user again.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub username_or_email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username_or_email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username_or_email: username_or_email.into(),
            password: password.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.username_or_email.is_empty() && !self.password.is_empty()
    }

    /// Parse a persisted credentials record. Corrupt or incomplete records
    /// are treated as absent.
    pub fn from_record(raw: &str) -> Option<Self> {
        serde_json::from_str::<Credentials>(raw)
            .ok()
            .filter(Credentials::is_complete)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username_or_email", &self.username_or_email)
            .field("password", &"<redacted>")
            .finish()
    }
}
