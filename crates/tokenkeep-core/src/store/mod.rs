//! The session store: single source of truth for the signed-in session.
//!
//! One `SessionStore` is built per process and cloned into every consumer.
//! Hydration, `ensure_session` and reauthentication are each single-flight,
//! so any number of concurrent callers cause at most one storage read and at
//! most one login at a time. Persistent storage is a write-through copy of the
//! in-memory state; its failures are logged and never roll memory back.

mod inflight;
mod state;

pub use state::StoreState;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::FutureExt;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::api::AuthApi;
use crate::auth::{Credentials, Session};
use crate::error::SessionError;
use crate::models::{Profile, ProfileUpdate};
use crate::storage::{SecureStore, CREDENTIALS_KEY, SESSION_KEY};

use inflight::{lock, InFlight, SharedTask};

/// Tunables for a `SessionStore`.
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    /// After a failed reauthentication, further attempts inside this window
    /// give up immediately instead of hitting the login endpoint again.
    /// Zero disables the cool-down.
    pub reauth_cooldown: Duration,
}

/// Which leg of the profile fetch we are on. A 401 on `First` buys exactly
/// one reauthentication; `AfterReauth` never retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProfileAttempt {
    First,
    AfterReauth,
}

/// A session obtained by reauthentication, with the profile fetched right
/// after it when that fetch succeeded.
#[derive(Debug, Clone)]
struct Renewal {
    session: Session,
    profile: Option<Profile>,
}

/// Shared handle to the session lifecycle. Clone is cheap.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Inner>,
}

struct Inner {
    api: Arc<dyn AuthApi>,
    storage: Arc<dyn SecureStore>,
    options: StoreOptions,
    state: watch::Sender<StoreState>,
    credentials: Mutex<Option<Credentials>>,
    /// Bumped on every sign-in and sign-out, inside the state lock. Work
    /// started under an older epoch neither adopts nor persists its result.
    epoch: AtomicU64,
    /// Held across each storage write or delete, so the epoch check and the
    /// write happen as one step.
    writes: AsyncMutex<()>,
    profile_fetches: AtomicUsize,
    last_reauth_failure: Mutex<Option<Instant>>,
    /// Set once and never cleared: hydration runs once per process.
    hydration: Mutex<Option<SharedTask<Option<Session>>>>,
    ensure: InFlight<Option<Session>>,
    reauth: InFlight<Option<Renewal>>,
}

impl SessionStore {
    pub fn new(api: Arc<dyn AuthApi>, storage: Arc<dyn SecureStore>) -> Self {
        Self::with_options(api, storage, StoreOptions::default())
    }

    pub fn with_options(
        api: Arc<dyn AuthApi>,
        storage: Arc<dyn SecureStore>,
        options: StoreOptions,
    ) -> Self {
        let (state, _) = watch::channel(StoreState::default());
        Self {
            inner: Arc::new(Inner {
                api,
                storage,
                options,
                state,
                credentials: Mutex::new(None),
                epoch: AtomicU64::new(0),
                writes: AsyncMutex::new(()),
                profile_fetches: AtomicUsize::new(0),
                last_reauth_failure: Mutex::new(None),
                hydration: Mutex::new(None),
                ensure: InFlight::new("ensure_session"),
                reauth: InFlight::new("reauthenticate"),
            }),
        }
    }

    // ===== Observable state =====

    pub fn state(&self) -> StoreState {
        self.inner.state.borrow().clone()
    }

    /// Receiver that sees every state change.
    pub fn subscribe(&self) -> watch::Receiver<StoreState> {
        self.inner.state.subscribe()
    }

    pub fn session(&self) -> Option<Session> {
        self.inner.current_session()
    }

    pub fn profile(&self) -> Option<Profile> {
        self.inner.state.borrow().profile.clone()
    }

    pub fn is_signed_in(&self) -> bool {
        self.inner.state.borrow().is_signed_in
    }

    // ===== Operations =====

    /// Restore the session from storage, once per process.
    ///
    /// Concurrent callers share the one pass; later callers get its cached
    /// outcome without touching storage again. Never fails: problems are
    /// logged and leave the store signed out.
    pub async fn hydrate(&self) -> Option<Session> {
        let task = {
            let mut slot = lock(&self.inner.hydration);
            slot.get_or_insert_with(|| {
                let inner = Arc::clone(&self.inner);
                async move { inner.run_hydration().await }.boxed().shared()
            })
            .clone()
        };
        task.await
    }

    /// Return a usable session, restoring or renewing one if needed.
    ///
    /// An in-memory session is returned without I/O. Otherwise this waits for
    /// a running hydration, then falls back to the stored session and finally
    /// to silent reauthentication. `None` means the user has to sign in.
    pub async fn ensure_session(&self) -> Option<Session> {
        if let Some(session) = self.inner.current_session() {
            return Some(session);
        }

        if let Some(hydration) = self.inner.pending_hydration() {
            if let Some(session) = hydration.await {
                return Some(session);
            }
            if let Some(session) = self.inner.current_session() {
                return Some(session);
            }
        }

        if !self.inner.storage_available() {
            return self.inner.reauthenticate().await.map(|r| r.session);
        }

        let inner = Arc::clone(&self.inner);
        self.inner
            .ensure
            .run(move || async move { inner.restore_or_reauthenticate().await })
            .await
    }

    /// Log in with `credentials`, then persist session and credentials.
    ///
    /// Only the login itself can fail this call. A failed profile fetch
    /// afterwards is logged and leaves the new session in place.
    pub async fn sign_in(&self, credentials: Credentials) -> Result<(), SessionError> {
        let session = self.inner.login(&credentials).await?;

        *lock(&self.inner.credentials) = Some(credentials.clone());
        *lock(&self.inner.last_reauth_failure) = None;
        let epoch = self.inner.begin_epoch(|s| {
            s.set_session(Some(session.clone()));
            s.profile = None;
        });
        info!(user = %credentials.username_or_email, "Signed in");

        self.inner.persist_session(&session, epoch).await;
        self.inner.persist_credentials(&credentials, epoch).await;

        if let Err(e) = self
            .inner
            .fetch_profile(session, ProfileAttempt::First)
            .await
        {
            warn!(error = %e, "Signed in, but fetching the profile failed");
        }
        Ok(())
    }

    /// Fetch the profile for the current session, surfacing errors.
    /// Returns `None` when there is no session to fetch with.
    pub async fn refresh_profile(&self) -> Result<Option<Profile>, SessionError> {
        let Some(session) = self.ensure_session().await else {
            return Ok(None);
        };
        self.inner
            .fetch_profile(session, ProfileAttempt::First)
            .await
            .map(Some)
    }

    /// Send a profile update and cache the profile the server returns.
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<Profile, SessionError> {
        let session = self
            .ensure_session()
            .await
            .ok_or(SessionError::NotSignedIn)?;
        let profile = self.inner.api.update_profile(&session, update).await?;
        self.inner.cache_profile(&session, &profile);
        Ok(profile)
    }

    /// Forget the session and the stored credentials. Idempotent.
    pub async fn sign_out(&self) {
        *lock(&self.inner.credentials) = None;
        *lock(&self.inner.last_reauth_failure) = None;
        let epoch = self.inner.begin_epoch(|s| {
            s.set_session(None);
            s.profile = None;
            s.is_fetching_profile = false;
            s.is_hydrating = false;
        });

        self.inner
            .delete_records(&[SESSION_KEY, CREDENTIALS_KEY], epoch)
            .await;
        info!("Signed out");
    }
}

impl Inner {
    fn current_session(&self) -> Option<Session> {
        self.state
            .borrow()
            .session
            .clone()
            .filter(Session::is_valid)
    }

    fn storage_available(&self) -> bool {
        self.state.borrow().is_storage_available
    }

    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn pending_hydration(&self) -> Option<SharedTask<Option<Session>>> {
        if !self.state.borrow().is_hydrating {
            return None;
        }
        lock(&self.hydration).clone()
    }

    /// Apply `change` and start a new epoch under the same state lock.
    fn begin_epoch(&self, change: impl FnOnce(&mut StoreState)) -> u64 {
        let mut epoch = 0;
        self.state.send_modify(|s| {
            epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            change(s);
        });
        epoch
    }

    /// Make `session` current unless a sign-in or sign-out happened since
    /// `epoch`. The check and the swap share the state lock.
    fn adopt(&self, session: &Session, epoch: u64) -> bool {
        let adopted = self.state.send_if_modified(|s| {
            if self.epoch() != epoch {
                return false;
            }
            s.set_session(Some(session.clone()));
            true
        });
        if !adopted {
            debug!("Session changed while this one was being obtained; discarding it");
        }
        adopted
    }

    // ===== Hydration =====

    async fn run_hydration(self: Arc<Self>) -> Option<Session> {
        let session = if !self.probe_storage().await {
            None
        } else if let Some(restore) = self.ensure.pending() {
            self.join_restore(restore).await
        } else {
            self.hydrate_from_storage().await
        };
        self.state.send_modify(|s| s.is_hydrating = false);
        debug!(restored = session.is_some(), "Hydration finished");
        session
    }

    /// An `ensure_session` restore started before hydration did; share its
    /// storage pass instead of reading the same records again.
    async fn join_restore(
        self: &Arc<Self>,
        restore: SharedTask<Option<Session>>,
    ) -> Option<Session> {
        debug!("Joining the storage restore already in flight");
        let session = restore.await?;
        let has_profile = self.state.borrow().profile.is_some();
        if !has_profile {
            self.fetch_profile_silently(session, ProfileAttempt::First)
                .await;
        }
        self.current_session()
    }

    async fn hydrate_from_storage(self: &Arc<Self>) -> Option<Session> {
        let epoch = self.epoch();

        if let Some(credentials) = self.read_credentials().await {
            let mut slot = lock(&self.credentials);
            if slot.is_none() {
                *slot = Some(credentials);
            }
        }

        if let Some(session) = self.read_session().await {
            if !self.adopt(&session, epoch) {
                return self.current_session();
            }
            info!(age = %session.age_display(), "Restored persisted session");
            self.persist_session(&session, epoch).await;
            self.fetch_profile_silently(session.clone(), ProfileAttempt::First)
                .await;
            return self.current_session();
        }

        let has_credentials = lock(&self.credentials).is_some();
        if !has_credentials {
            debug!("Nothing to restore");
            return None;
        }
        self.reauthenticate().await.map(|r| r.session)
    }

    async fn probe_storage(&self) -> bool {
        let available = self.storage.is_available().await;
        if !available {
            warn!("Secure storage unavailable; the session will not survive a restart");
        }
        self.state.send_modify(|s| s.is_storage_available = available);
        available
    }

    // ===== ensure_session =====

    async fn restore_or_reauthenticate(self: Arc<Self>) -> Option<Session> {
        // A sign-in may have landed while this call was queued
        if let Some(session) = self.current_session() {
            return Some(session);
        }

        let epoch = self.epoch();
        if let Some(session) = self.read_session().await {
            if self.adopt(&session, epoch) {
                debug!("Adopted stored session");
                return Some(session);
            }
            return self.current_session();
        }

        self.reauthenticate().await.map(|r| r.session)
    }

    // ===== Reauthentication =====

    /// Join or start the single reauthentication attempt.
    ///
    /// Returns the shared task rather than being `async` itself, which keeps
    /// the profile fetch -> reauthenticate -> profile fetch chain from forming
    /// a recursive future type.
    fn reauthenticate(self: &Arc<Self>) -> SharedTask<Option<Renewal>> {
        let inner = Arc::clone(self);
        self.reauth
            .run(move || async move { inner.reauthenticate_once().await })
    }

    async fn reauthenticate_once(self: Arc<Self>) -> Option<Renewal> {
        let epoch = self.epoch();

        if let Some(remaining) = self.cooldown_remaining() {
            debug!(
                remaining_ms = remaining.as_millis() as u64,
                "Reauthentication cooling down after a failure"
            );
            return None;
        }

        let Some(credentials) = self.load_credentials().await else {
            debug!("No stored credentials; cannot reauthenticate");
            return None;
        };

        match self.login(&credentials).await {
            Ok(session) => {
                *lock(&self.last_reauth_failure) = None;
                if !self.adopt(&session, epoch) {
                    return self.current_session().map(|session| Renewal {
                        session,
                        profile: None,
                    });
                }
                info!("Reauthenticated with stored credentials");
                self.persist_session(&session, epoch).await;
                // No retry here: a 401 would re-enter this very operation
                let profile = self
                    .fetch_profile_silently(session.clone(), ProfileAttempt::AfterReauth)
                    .await;
                Some(Renewal { session, profile })
            }
            Err(e) => {
                warn!(error = %e, "Silent reauthentication failed");
                if self.epoch() == epoch {
                    *lock(&self.last_reauth_failure) = Some(Instant::now());
                }
                None
            }
        }
    }

    fn cooldown_remaining(&self) -> Option<Duration> {
        let cooldown = self.options.reauth_cooldown;
        if cooldown.is_zero() {
            return None;
        }
        let failed_at = (*lock(&self.last_reauth_failure))?;
        let elapsed = failed_at.elapsed();
        (elapsed < cooldown).then(|| cooldown - elapsed)
    }

    async fn login(&self, credentials: &Credentials) -> Result<Session, SessionError> {
        debug!(user = %credentials.username_or_email, "Logging in");
        let session = self.api.login(credentials).await?;
        if !session.is_valid() {
            return Err(SessionError::MissingToken);
        }
        Ok(session)
    }

    // ===== Profile =====

    async fn fetch_profile(
        self: &Arc<Self>,
        session: Session,
        attempt: ProfileAttempt,
    ) -> Result<Profile, SessionError> {
        let mut session = session;
        let mut attempt = attempt;

        loop {
            let result = {
                let _fetching = ProfileFetch::start(self);
                self.api.get_profile(&session).await
            };

            match result {
                Ok(profile) => {
                    self.cache_profile(&session, &profile);
                    return Ok(profile);
                }
                Err(e) if e.is_unauthorized() && attempt == ProfileAttempt::First => {
                    debug!("Profile fetch rejected the token; reauthenticating");
                    match self.reauthenticate().await {
                        Some(Renewal {
                            profile: Some(profile),
                            ..
                        }) => return Ok(profile),
                        Some(renewal) => {
                            session = renewal.session;
                            attempt = ProfileAttempt::AfterReauth;
                        }
                        None => {
                            self.clear_session(&session).await;
                            return Err(e.into());
                        }
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn fetch_profile_silently(
        self: &Arc<Self>,
        session: Session,
        attempt: ProfileAttempt,
    ) -> Option<Profile> {
        self.fetch_profile(session, attempt)
            .await
            .map_err(|e| debug!(error = %e, "Silent profile fetch failed"))
            .ok()
    }

    /// Cache `profile` only if `session` is still the current one.
    fn cache_profile(&self, session: &Session, profile: &Profile) {
        self.state.send_if_modified(|s| {
            if s.holds_token(&session.access_token) {
                s.profile = Some(profile.clone());
                true
            } else {
                false
            }
        });
    }

    /// Drop a session the server rejected and that could not be renewed.
    /// Credentials stay so a later attempt can still succeed.
    async fn clear_session(&self, rejected: &Session) {
        let mut epoch = None;
        self.state.send_if_modified(|s| {
            if !s.holds_token(&rejected.access_token) {
                return false;
            }
            s.set_session(None);
            s.profile = None;
            epoch = Some(self.epoch());
            true
        });
        let Some(epoch) = epoch else {
            return;
        };
        warn!("Session rejected and could not be renewed; signed out");
        self.delete_records(&[SESSION_KEY], epoch).await;
    }

    // ===== Persistence =====

    async fn read_session(&self) -> Option<Session> {
        let raw = self.read_record(SESSION_KEY).await?;
        let session = Session::from_record(&raw);
        if session.is_none() {
            warn!("Ignoring malformed persisted session");
        }
        session
    }

    async fn read_credentials(&self) -> Option<Credentials> {
        let raw = self.read_record(CREDENTIALS_KEY).await?;
        let credentials = Credentials::from_record(&raw);
        if credentials.is_none() {
            warn!("Ignoring malformed persisted credentials");
        }
        credentials
    }

    /// In-memory credentials, else the stored ones.
    async fn load_credentials(&self) -> Option<Credentials> {
        let cached = lock(&self.credentials).clone();
        if cached.is_some() {
            return cached;
        }
        if !self.storage_available() {
            return None;
        }
        let credentials = self.read_credentials().await?;
        // A sign-in may have set newer credentials during the read
        Some(
            lock(&self.credentials)
                .get_or_insert(credentials)
                .clone(),
        )
    }

    async fn read_record(&self, key: &str) -> Option<String> {
        match self.storage.get(key).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key, error = %e, "Failed to read persisted record");
                None
            }
        }
    }

    async fn persist_session(&self, session: &Session, epoch: u64) {
        self.write_record(SESSION_KEY, serde_json::to_string(session), epoch)
            .await;
    }

    async fn persist_credentials(&self, credentials: &Credentials, epoch: u64) {
        self.write_record(CREDENTIALS_KEY, serde_json::to_string(credentials), epoch)
            .await;
    }

    async fn write_record(
        &self,
        key: &str,
        record: Result<String, serde_json::Error>,
        epoch: u64,
    ) {
        if !self.storage_available() {
            debug!(key, "Storage unavailable; keeping record in memory only");
            return;
        }
        let _writing = self.writes.lock().await;
        if self.epoch() != epoch {
            debug!(key, "Session changed before the record was written; skipping");
            return;
        }
        let result = match record {
            Ok(raw) => self.storage.set(key, &raw).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            warn!(key, error = %e, "Failed to persist record");
        }
    }

    async fn delete_records(&self, keys: &[&str], epoch: u64) {
        if !self.storage_available() {
            return;
        }
        let _writing = self.writes.lock().await;
        if self.epoch() != epoch {
            return;
        }
        for &key in keys {
            if let Err(e) = self.storage.delete(key).await {
                warn!(key, error = %e, "Failed to delete persisted record");
            }
        }
    }
}

/// Keeps `is_fetching_profile` set while any profile fetch is outstanding.
struct ProfileFetch<'a> {
    inner: &'a Inner,
}

impl<'a> ProfileFetch<'a> {
    fn start(inner: &'a Inner) -> Self {
        inner.state.send_modify(|s| {
            inner.profile_fetches.fetch_add(1, Ordering::SeqCst);
            s.is_fetching_profile = true;
        });
        Self { inner }
    }
}

impl Drop for ProfileFetch<'_> {
    fn drop(&mut self) {
        let inner = self.inner;
        inner.state.send_modify(|s| {
            let outstanding = inner.profile_fetches.fetch_sub(1, Ordering::SeqCst) - 1;
            s.is_fetching_profile = outstanding > 0;
        });
    }
}
