use crate::auth::Session;
use crate::models::Profile;

/// Observable snapshot of the session store, for binding to UI.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreState {
    pub is_signed_in: bool,
    pub is_hydrating: bool,
    pub session: Option<Session>,
    pub profile: Option<Profile>,
    pub is_fetching_profile: bool,
    pub is_storage_available: bool,
}

impl Default for StoreState {
    /// A fresh store is considered hydrating until its first pass settles.
    fn default() -> Self {
        Self {
            is_signed_in: false,
            is_hydrating: true,
            session: None,
            profile: None,
            is_fetching_profile: false,
            is_storage_available: true,
        }
    }
}

impl StoreState {
    /// Replace the session, keeping `is_signed_in` in step with it.
    pub(crate) fn set_session(&mut self, session: Option<Session>) {
        self.is_signed_in = session.as_ref().is_some_and(Session::is_valid);
        self.session = session;
    }

    pub(crate) fn holds_token(&self, access_token: &str) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.access_token == access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_in_tracks_session() {
        let mut state = StoreState::default();
        assert!(!state.is_signed_in);

        state.set_session(Some(Session::new("t", "Bearer")));
        assert!(state.is_signed_in);
        assert!(state.holds_token("t"));

        state.set_session(Some(Session::new("", "Bearer")));
        assert!(!state.is_signed_in);

        state.set_session(None);
        assert!(!state.is_signed_in);
        assert!(!state.holds_token("t"));
    }
}
