use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The user record returned by the profile endpoint.
///
/// Only a handful of fields are interpreted; everything else the server sends
/// is kept in `extra` so callers can read fields this crate does not know about.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Profile {
    /// Best label for showing the user: display name, then email.
    pub fn label(&self) -> Option<&str> {
        self.display_name
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.email.as_deref())
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.extra.get(name)
    }
}

/// Partial profile update. Unset fields are not sent.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProfileUpdate {
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(name.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_profile_keeps_unknown_fields() {
        let profile: Profile = serde_json::from_value(json!({
            "id": 42,
            "email": "a@example.com",
            "displayName": "Ada",
            "loyaltyPoints": 120
        }))
        .unwrap();

        assert_eq!(profile.id, Some(json!(42)));
        assert_eq!(profile.label(), Some("Ada"));
        assert_eq!(profile.field("loyaltyPoints"), Some(&json!(120)));
    }

    #[test]
    fn test_profile_label_falls_back_to_email() {
        let profile = Profile {
            email: Some("a@example.com".to_string()),
            display_name: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(profile.label(), Some("a@example.com"));
    }

    #[test]
    fn test_update_serializes_only_set_fields() {
        let update = ProfileUpdate {
            display_name: Some("Ada".to_string()),
            ..Default::default()
        }
        .with_field("phone", "555-0100");

        let body = serde_json::to_value(&update).unwrap();
        assert_eq!(body, json!({"displayName": "Ada", "phone": "555-0100"}));
        assert_eq!(serde_json::to_value(ProfileUpdate::default()).unwrap(), json!({}));
    }
}
