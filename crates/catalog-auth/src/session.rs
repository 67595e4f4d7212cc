//! Auth session manager
//!
//! Owns the credential lifecycle state machine:
//!
//! - `LoggedOut | LoggedIn -> Authorizing` on `login()`
//! - `Authorizing -> LoggedIn` on a successful `handle_callback()`
//! - `LoggedIn -> Refreshing -> LoggedIn` on a successful `refresh()`,
//!   `-> LoggedOut` when the refresh fails
//! - any state `-> LoggedOut` on `logout()`
//!
//! The state itself is never stored; `state()` derives it from the held
//! credential, the pending verifier, and whether a refresh is in flight.
//!
//! Refresh is a critical section. Providers that rotate refresh tokens
//! invalidate the old one on first use, so two concurrent refresh calls
//! would strand the session. The first caller publishes a shared future,
//! later callers await the same one, and the slot is cleared when it
//! finishes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use common::Secret;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::OAuthConfig;
use crate::credentials::{Credential, CredentialStore, now_millis};
use crate::error::{Error, Result};
use crate::pkce::{PkcePair, build_authorization_url};
use crate::token;

/// Derived lifecycle state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    LoggedOut,
    Authorizing,
    LoggedIn,
    Refreshing,
}

impl AuthState {
    pub fn label(&self) -> &'static str {
        match self {
            AuthState::LoggedOut => "logged_out",
            AuthState::Authorizing => "authorizing",
            AuthState::LoggedIn => "logged_in",
            AuthState::Refreshing => "refreshing",
        }
    }
}

/// Performs the full-page redirect to the authorization endpoint.
pub trait Navigator: Send + Sync {
    fn navigate(&self, url: &Url);
}

/// Navigator that only remembers where it was sent.
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    visited: Mutex<Vec<Url>>,
}

impl RecordingNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn visited(&self) -> Vec<Url> {
        lock(&self.visited).clone()
    }

    pub fn last(&self) -> Option<Url> {
        lock(&self.visited).last().cloned()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, url: &Url) {
        lock(&self.visited).push(url.clone());
    }
}

type RefreshFuture = Shared<BoxFuture<'static, Result<Credential>>>;

/// Handle to the single credential session.
///
/// Cloning is cheap and every clone shares the same state, so one session is
/// built at startup and handed to each consumer.
#[derive(Clone)]
pub struct AuthSession {
    inner: Arc<Inner>,
}

struct Inner {
    config: OAuthConfig,
    http: reqwest::Client,
    store: CredentialStore,
    navigator: Arc<dyn Navigator>,
    credential: Mutex<Option<Credential>>,
    refreshing: Mutex<Option<RefreshFuture>>,
    /// Bumped whenever the session is replaced or ended, so a refresh that
    /// started before a logout cannot resurrect the credential.
    epoch: AtomicU64,
    state_tx: watch::Sender<AuthState>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl AuthSession {
    /// Build the session and restore any credential left in storage.
    pub fn new(
        config: OAuthConfig,
        store: CredentialStore,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Http(format!("building HTTP client: {e}")))?;
        Self::with_http_client(config, store, navigator, http)
    }

    pub fn with_http_client(
        config: OAuthConfig,
        store: CredentialStore,
        navigator: Arc<dyn Navigator>,
        http: reqwest::Client,
    ) -> Result<Self> {
        config.validate()?;

        let credential = store.load();
        if let Some(c) = &credential {
            info!(
                expires_at = c.expires_at,
                expired = c.is_expired(),
                "restored credential from session storage"
            );
        }

        let (state_tx, _) = watch::channel(AuthState::LoggedOut);
        let inner = Inner {
            config,
            http,
            store,
            navigator,
            credential: Mutex::new(credential),
            refreshing: Mutex::new(None),
            epoch: AtomicU64::new(0),
            state_tx,
        };
        inner.publish();
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.inner.config
    }

    /// Start an authorization round trip.
    ///
    /// Stores a fresh verifier (abandoning any unconsumed one) and sends the
    /// navigator to the authorization endpoint. Returns the redirect URL.
    pub fn login(&self) -> Url {
        let pkce = PkcePair::generate();
        if !self.inner.store.put_verifier(&pkce.verifier) {
            warn!("PKCE verifier not persisted, the callback will not be redeemable");
        }
        let url = build_authorization_url(&self.inner.config, &pkce.challenge);
        info!(
            authorize_endpoint = %self.inner.config.authorize_endpoint,
            "redirecting to authorization endpoint"
        );
        self.inner.publish();
        self.inner.navigator.navigate(&url);
        url
    }

    /// Redeem an authorization code.
    ///
    /// The pending verifier is read and deleted before anything else, so a
    /// repeated callback fails with `MissingVerifier` and leaves the current
    /// credential untouched.
    pub async fn handle_callback(&self, code: &str) -> Result<()> {
        let verifier = self
            .inner
            .store
            .take_verifier()
            .ok_or(Error::MissingVerifier)?;
        self.inner.publish();

        let response =
            token::exchange_code(&self.inner.http, &self.inner.config, code, verifier.as_str())
                .await
                .inspect_err(|e| warn!(error = %e, "authorization code exchange failed"))?;

        let credential = Credential::from_response(response, None, now_millis()).ok_or_else(
            || Error::TokenExchange("token response did not include a refresh_token".into()),
        )?;
        let expires_at = credential.expires_at;
        self.inner.replace(credential);
        info!(expires_at, "authorization code exchanged, logged in");
        Ok(())
    }

    /// Drop a pending authorization without redeeming it.
    pub fn cancel_authorization(&self) {
        if self.inner.store.take_verifier().is_some() {
            debug!("discarded pending PKCE verifier");
        }
        self.inner.publish();
    }

    /// Exchange the refresh token for a new access token.
    ///
    /// Concurrent callers share one token-endpoint call and all receive its
    /// outcome. Any failure ends the session.
    pub async fn refresh(&self) -> Result<Credential> {
        self.refresh_unless(|_| false).await
    }

    /// The held credential if it is still valid, otherwise the outcome of a
    /// (possibly shared) refresh.
    pub async fn ensure_fresh(&self) -> Result<Credential> {
        self.refresh_unless(|current| current.is_valid_at(now_millis())).await
    }

    /// Refresh after the provider rejected `rejected_token`.
    ///
    /// If another caller already rotated the credential since that token was
    /// attached, the current one is returned without a token-endpoint call.
    pub async fn refresh_rejected(&self, rejected_token: &str) -> Result<Credential> {
        self.refresh_unless(|current| {
            current.is_valid_at(now_millis()) && current.access_token.as_str() != rejected_token
        })
        .await
    }

    /// Join the in-flight refresh, or start one unless `usable` accepts the
    /// held credential. The check and the start happen under the same lock,
    /// so a refresh that just committed is never followed by a redundant one.
    async fn refresh_unless(
        &self,
        usable: impl FnOnce(&Credential) -> bool,
    ) -> Result<Credential> {
        let pending = {
            let mut slot = lock(&self.inner.refreshing);
            match slot.as_ref() {
                Some(in_flight) => {
                    debug!("joining in-flight token refresh");
                    in_flight.clone()
                }
                None => {
                    let held = lock(&self.inner.credential).clone();
                    if let Some(current) = held.filter(|c| usable(c)) {
                        debug!("held credential still usable, refresh skipped");
                        return Ok(current);
                    }
                    let task = Inner::refresh_task(self.inner.clone()).boxed().shared();
                    *slot = Some(task.clone());
                    task
                }
            }
        };
        self.inner.publish();
        pending.await
    }

    /// End the session. Idempotent.
    pub fn logout(&self) {
        self.inner.end_session();
        info!("logged out");
    }

    /// `LoggedIn` with an unexpired access token.
    pub fn is_authenticated(&self) -> bool {
        lock(&self.inner.credential)
            .as_ref()
            .is_some_and(|c| c.is_valid_at(now_millis()))
    }

    pub fn state(&self) -> AuthState {
        self.inner.derive_state()
    }

    /// Receiver notified on every committed state transition.
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.inner.state_tx.subscribe()
    }

    pub fn credential(&self) -> Option<Credential> {
        lock(&self.inner.credential).clone()
    }

    /// The held credential, if its access token hasn't expired.
    pub fn valid_credential(&self) -> Option<Credential> {
        self.credential().filter(|c| c.is_valid_at(now_millis()))
    }

    pub fn access_token(&self) -> Option<Secret<String>> {
        lock(&self.inner.credential)
            .as_ref()
            .map(|c| c.access_token.clone())
    }
}

impl Inner {
    fn derive_state(&self) -> AuthState {
        if lock(&self.refreshing).is_some() {
            AuthState::Refreshing
        } else if self.store.has_pending_verifier() {
            AuthState::Authorizing
        } else if lock(&self.credential).is_some() {
            AuthState::LoggedIn
        } else {
            AuthState::LoggedOut
        }
    }

    /// Push the current derived state to subscribers. Must not be called
    /// while holding the `credential` or `refreshing` lock.
    fn publish(&self) {
        let state = self.derive_state();
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                debug!(state = state.label(), "auth state changed");
                *current = state;
                true
            }
        });
    }

    /// Install a freshly issued credential as a new session.
    fn replace(&self, credential: Credential) {
        {
            let mut slot = lock(&self.credential);
            self.epoch.fetch_add(1, Ordering::SeqCst);
            self.store.save(&credential);
            *slot = Some(credential);
        }
        self.publish();
    }

    /// Store a refreshed credential unless the session changed since
    /// `epoch` was read.
    fn commit_refreshed(&self, epoch: u64, credential: Credential) -> bool {
        {
            let mut slot = lock(&self.credential);
            if self.epoch.load(Ordering::SeqCst) != epoch {
                return false;
            }
            self.store.save(&credential);
            *slot = Some(credential);
        }
        self.publish();
        true
    }

    fn end_session(&self) {
        {
            let mut slot = lock(&self.credential);
            self.epoch.fetch_add(1, Ordering::SeqCst);
            *slot = None;
            self.store.clear();
        }
        self.publish();
    }

    /// End the session only if nothing replaced it since `epoch`.
    fn end_session_if_current(&self, epoch: u64) {
        let ended = {
            let mut slot = lock(&self.credential);
            if self.epoch.load(Ordering::SeqCst) == epoch {
                self.epoch.fetch_add(1, Ordering::SeqCst);
                *slot = None;
                self.store.clear();
                true
            } else {
                false
            }
        };
        if ended {
            info!("session ended after failed refresh");
            self.publish();
        }
    }

    async fn refresh_task(inner: Arc<Inner>) -> Result<Credential> {
        let result = inner.run_refresh().await;
        lock(&inner.refreshing).take();
        inner.publish();
        result
    }

    async fn run_refresh(&self) -> Result<Credential> {
        let (epoch, refresh) = {
            let slot = lock(&self.credential);
            let refresh = slot
                .as_ref()
                .map(|c| c.refresh_token.clone())
                .filter(|rt| !rt.is_empty());
            (self.epoch.load(Ordering::SeqCst), refresh)
        };

        let Some(refresh) = refresh else {
            debug!("no refresh token held, refresh denied without a network call");
            self.end_session_if_current(epoch);
            return Err(Error::RefreshDenied("no refresh token available".into()));
        };

        let response = match token::refresh_token(&self.http, &self.config, refresh.as_str()).await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "token refresh failed");
                self.end_session_if_current(epoch);
                return Err(e);
            }
        };

        let rotated = response.refresh_token.is_some();
        let Some(credential) = Credential::from_response(response, Some(&refresh), now_millis())
        else {
            self.end_session_if_current(epoch);
            return Err(Error::RefreshDenied(
                "refresh response carried no usable refresh token".into(),
            ));
        };

        if !self.commit_refreshed(epoch, credential.clone()) {
            warn!("session changed while refreshing, discarding refreshed tokens");
            return Err(Error::RefreshDenied(
                "session ended while the refresh was in flight".into(),
            ));
        }

        info!(
            expires_at = credential.expires_at,
            rotated, "access token refreshed"
        );
        Ok(credential)
    }
}
