use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Token type assumed when the login response omits one.
pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// An authenticated session. Replaced wholesale, never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// When this token was issued to us. Records written before this field
    /// existed parse as "now".
    #[serde(default = "Utc::now")]
    pub issued_at: DateTime<Utc>,
}

fn default_token_type() -> String {
    DEFAULT_TOKEN_TYPE.to_string()
}

impl Session {
    pub fn new(access_token: impl Into<String>, token_type: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: token_type.into(),
            issued_at: Utc::now(),
        }
    }

    /// A session is only usable when it carries a non-empty token.
    pub fn is_valid(&self) -> bool {
        !self.access_token.is_empty()
    }

    /// Value for the `Authorization` header.
    pub fn authorization_header(&self) -> String {
        let token_type = if self.token_type.is_empty() {
            DEFAULT_TOKEN_TYPE
        } else {
            self.token_type.as_str()
        };
        format!("{} {}", token_type, self.access_token)
    }

    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.issued_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            // Also covers clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            if minutes % 60 >= 30 {
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            if (minutes % 1440) / 60 >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }

    /// Parse a persisted session record. Corrupt or token-less records are
    /// treated as absent.
    pub fn from_record(raw: &str) -> Option<Self> {
        serde_json::from_str::<Session>(raw)
            .ok()
            .filter(Session::is_valid)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_authorization_header() {
        let session = Session::new("abc", "Bearer");
        assert_eq!(session.authorization_header(), "Bearer abc");

        let untyped = Session::new("abc", "");
        assert_eq!(untyped.authorization_header(), "Bearer abc");
    }

    #[test]
    fn test_from_record_accepts_camel_case() {
        let session = Session::from_record(r#"{"accessToken":"t1","tokenType":"JWT"}"#).unwrap();
        assert_eq!(session.access_token, "t1");
        assert_eq!(session.token_type, "JWT");
    }

    #[test]
    fn test_from_record_defaults_token_type() {
        let session = Session::from_record(r#"{"accessToken":"t1"}"#).unwrap();
        assert_eq!(session.token_type, "Bearer");
    }

    #[test]
    fn test_from_record_rejects_garbage() {
        assert!(Session::from_record("not json").is_none());
        assert!(Session::from_record(r#"{"tokenType":"Bearer"}"#).is_none());
        assert!(Session::from_record(r#"{"accessToken":"","tokenType":"Bearer"}"#).is_none());
    }

    #[test]
    fn test_age_display() {
        let mut session = Session::new("t", "Bearer");
        assert_eq!(session.age_display(), "just now");

        session.issued_at = Utc::now() - Duration::minutes(5);
        assert_eq!(session.age_display(), "5m ago");

        session.issued_at = Utc::now() - Duration::minutes(95);
        assert_eq!(session.age_display(), "2h ago");

        session.issued_at = Utc::now() - Duration::days(3);
        assert_eq!(session.age_display(), "3d ago");
    }
}
