//! Credential lifecycle management.
//!
//! `AuthManager` orchestrates login, logout, expiry-driven logout, and
//! de-duplicated refresh over the token store, and is the only writer of
//! session state. One instance exists per process; it is constructed
//! explicitly and cloned cheaply (`Arc` inner) into whatever needs it.
//!
//! Concurrency model: all session transitions (install, clear) run under a
//! single epoch lock. The epoch counter is bumped by every login, logout,
//! and expiry, and a refresh outcome is only applied if the epoch it was
//! dispatched under is still current, so a response that arrives after a
//! logout is discarded rather than re-applied. At most one refresh is in
//! flight at a time; concurrent callers share its future and observe its
//! single outcome.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex as SyncMutex;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::models::UserProfile;

use super::codec::{self, Claims};
use super::error::AuthError;
use super::state::{AuthEvent, SessionPublisher, SessionState};
use super::store::{Credential, TokenStore};

/// Capacity of the auth event channel. Consumers are UI-speed; 16 gives a
/// slow subscriber room before it starts lagging.
const EVENT_CHANNEL_CAPACITY: usize = 16;

type SharedRefresh = Shared<BoxFuture<'static, Result<String, AuthError>>>;

/// Token endpoint response for both password and refresh grants.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: u64,
}

#[derive(Clone)]
pub struct AuthManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    http: reqwest::Client,
    store: TokenStore,
    session: SessionPublisher,
    events: broadcast::Sender<AuthEvent>,
    /// Session epoch. The lock serializes every state transition; the value
    /// identifies which session a dispatched refresh belongs to.
    epoch: SyncMutex<u64>,
    expiry_task: SyncMutex<Option<JoinHandle<()>>>,
    refresh_slot: Mutex<Option<SharedRefresh>>,
    /// Handed to the expiry timer task, so a dropped manager disarms the
    /// timer instead of being kept alive by it.
    self_weak: Weak<Inner>,
}

impl AuthManager {
    /// The HTTP client is injected so the process shares one connection
    /// pool between the manager and the API client.
    pub fn new(config: Config, store: TokenStore, http: reqwest::Client) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new_cyclic(|self_weak| Inner {
                config,
                http,
                store,
                session: SessionPublisher::new(),
                events,
                epoch: SyncMutex::new(0),
                expiry_task: SyncMutex::new(None),
                refresh_slot: Mutex::new(None),
                self_weak: self_weak.clone(),
            }),
        }
    }

    /// Current session snapshot.
    pub fn session_state(&self) -> SessionState {
        self.inner.session.current()
    }

    /// Watch the session: the receiver yields the latest value immediately
    /// and wakes for every subsequent change.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.session.subscribe()
    }

    /// Lifecycle event stream.
    pub fn subscribe_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.inner.events.subscribe()
    }

    /// Whether a stored, decodable, unexpired credential exists.
    pub fn is_authenticated(&self) -> bool {
        match self.inner.store.read() {
            Some(credential) => codec::decode(&credential.access_token)
                .map(|claims| !claims.is_expired())
                .unwrap_or(false),
            None => false,
        }
    }

    /// Exchange a username/password pair for a credential.
    ///
    /// On success the credential is stored, session state is recomputed,
    /// the expiry timer is armed, and the user profile is fetched
    /// best-effort. The endpoint's rejection (HTTP 400/401) maps to
    /// [`AuthError::InvalidCredentials`]; every other failure, network
    /// included, maps to [`AuthError::EndpointUnavailable`].
    pub async fn login(&self, username: &str, password: &str) -> Result<(), AuthError> {
        let inner = &self.inner;
        let params = [
            ("client_id", inner.config.client_id.as_str()),
            ("grant_type", "password"),
            ("username", username),
            ("password", password),
        ];

        let response = inner
            .http
            .post(inner.config.token_endpoint())
            .form(&params)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                inner.clear_local();
                return Err(AuthError::EndpointUnavailable(err.to_string()));
            }
        };

        let status = response.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            inner.clear_local();
            return Err(AuthError::InvalidCredentials);
        }
        if !status.is_success() {
            inner.clear_local();
            return Err(AuthError::EndpointUnavailable(format!(
                "token endpoint returned {status}"
            )));
        }

        let tokens: TokenResponse = match response.json().await {
            Ok(tokens) => tokens,
            Err(err) => {
                inner.clear_local();
                return Err(AuthError::EndpointUnavailable(err.to_string()));
            }
        };

        let credential = credential_from(&tokens);
        let claims = match codec::decode(&credential.access_token) {
            Ok(claims) => claims,
            Err(err) => {
                inner.clear_local();
                return Err(AuthError::EndpointUnavailable(format!(
                    "issuer returned an undecodable access token: {err}"
                )));
            }
        };

        inner.install_credential(&credential, &claims, None)?;
        info!(username, "login succeeded");
        inner.emit(AuthEvent::LoggedIn);

        self.fetch_profile_into_session().await;
        Ok(())
    }

    /// Clear the credential, cancel the expiry timer, and publish the
    /// anonymous state. Navigation after logout is the caller's concern.
    pub async fn logout(&self) {
        self.inner.clear_local();
        self.inner.emit(AuthEvent::LoggedOut);
        info!("logged out");
    }

    /// Reconcile session state with the stored credential. Idempotent and
    /// network-free; an expired or undecodable credential behaves as
    /// logout.
    pub async fn sync_auth_state(&self) {
        let inner = &self.inner;
        let Some(credential) = inner.store.read() else {
            inner.session.publish(SessionState::anonymous());
            return;
        };

        let claims = match codec::decode(&credential.access_token) {
            Ok(claims) => claims,
            Err(err) => {
                warn!(error = %err, "stored access token is undecodable, clearing session");
                inner.clear_local();
                return;
            }
        };

        if claims.is_expired() {
            debug!("stored access token has expired, clearing session");
            inner.clear_local();
            inner.emit(AuthEvent::TokenExpired);
            return;
        }

        // Publish under the epoch lock so a concurrent logout cannot be
        // overwritten by this recompute.
        let _epoch = inner.epoch.lock();
        if inner.store.read().is_none() {
            inner.session.publish(SessionState::anonymous());
            return;
        }
        inner
            .session
            .publish(session_state_from_claims(&claims, &inner.config.client_id));
        inner.arm_expiry_timer(credential.expires_at);
    }

    /// A token that is valid for at least the configured slack, refreshing
    /// first when needed. `None` when anonymous or when renewal fails;
    /// failures are logged, not surfaced.
    pub async fn valid_access_token(&self) -> Option<String> {
        self.inner.store.read()?;
        match self.refresh().await {
            Ok(token) => Some(token),
            Err(err) => {
                warn!(error = %err, "failed to obtain a valid access token");
                None
            }
        }
    }

    /// Refresh honoring the minimum-validity slack: while the current token
    /// is still valid beyond the slack, it is returned without a network
    /// round trip.
    pub async fn refresh(&self) -> Result<String, AuthError> {
        self.refresh_with(false).await
    }

    /// Unconditional refresh, ignoring the slack. `None` on failure.
    pub async fn force_refresh(&self) -> Option<String> {
        match self.refresh_with(true).await {
            Ok(token) => Some(token),
            Err(err) => {
                warn!(error = %err, "forced token refresh failed");
                None
            }
        }
    }

    async fn refresh_with(&self, force: bool) -> Result<String, AuthError> {
        let inner = &self.inner;
        let Some(credential) = inner.store.read() else {
            return Err(AuthError::RefreshFailed("no session to refresh".to_string()));
        };

        if !force {
            let slack = Duration::from_secs(inner.config.min_token_validity_secs);
            if credential.remaining() > slack {
                return Ok(credential.access_token);
            }
        }

        // Single flight: the first caller installs the shared future, every
        // concurrent caller joins it, and the slot is cleared only once the
        // operation settles.
        let shared = {
            let mut slot = inner.refresh_slot.lock().await;
            match slot.as_ref() {
                Some(shared) => shared.clone(),
                None => {
                    let owner = Arc::clone(inner);
                    let dispatched_epoch = inner.current_epoch();
                    let refresh_token = credential.refresh_token.clone();
                    let fut = async move {
                        let outcome = owner
                            .exchange_refresh_token(refresh_token, dispatched_epoch)
                            .await;
                        owner.refresh_slot.lock().await.take();
                        outcome
                    }
                    .boxed()
                    .shared();
                    *slot = Some(fut.clone());
                    fut
                }
            }
        };

        shared.await
    }

    /// Direct store access for test fixtures.
    #[cfg(test)]
    pub(crate) fn store(&self) -> &TokenStore {
        &self.inner.store
    }

    /// Fetch the profile and fold it into session state. Every failure is
    /// absorbed: the session remains valid on token data alone.
    pub async fn fetch_profile_into_session(&self) {
        let inner = &self.inner;
        let Some(credential) = inner.store.read() else {
            return;
        };

        let url = format!(
            "{}/api/users/me",
            inner.config.backend_base_url.trim_end_matches('/')
        );
        let response = match inner
            .http
            .get(&url)
            .bearer_auth(&credential.access_token)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                debug!(status = %response.status(), "profile endpoint unavailable");
                return;
            }
            Err(err) => {
                debug!(error = %err, "profile fetch failed");
                return;
            }
        };

        match response.json::<UserProfile>().await {
            Ok(profile) => inner.apply_profile(&profile),
            Err(err) => debug!(error = %err, "profile payload is malformed"),
        }
    }
}

impl Inner {
    fn current_epoch(&self) -> u64 {
        *self.epoch.lock()
    }

    fn emit(&self, event: AuthEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    /// Store a credential and recompute session state. `expected_epoch` is
    /// `None` for a fresh login (which starts a new session) and
    /// `Some(epoch)` for a refresh outcome, which is discarded when the
    /// session has transitioned since dispatch.
    fn install_credential(
        &self,
        credential: &Credential,
        claims: &Claims,
        expected_epoch: Option<u64>,
    ) -> Result<(), AuthError> {
        let mut epoch = self.epoch.lock();
        match expected_epoch {
            Some(expected) if *epoch != expected => {
                debug!("discarding refresh outcome that arrived after a session transition");
                return Err(AuthError::RefreshFailed(
                    "session closed while refreshing".to_string(),
                ));
            }
            Some(_) => {}
            None => *epoch += 1,
        }

        self.store
            .save(credential)
            .map_err(|err| AuthError::Storage(err.to_string()))?;
        self.session
            .publish(session_state_from_claims(claims, &self.config.client_id));
        self.arm_expiry_timer(credential.expires_at);
        Ok(())
    }

    /// Clear the stored credential, cancel the timer, and publish the
    /// anonymous state. Bumps the epoch so in-flight refresh outcomes are
    /// discarded.
    fn clear_local(&self) {
        let mut epoch = self.epoch.lock();
        *epoch += 1;
        self.cancel_expiry_timer();
        if let Err(err) = self.store.clear() {
            warn!(error = %err, "failed to clear credential store");
        }
        self.session.publish(SessionState::anonymous());
    }

    /// Arm the logout timer for exactly the remaining token lifetime. At
    /// most one timer is outstanding: the previous one is aborted first.
    fn arm_expiry_timer(&self, expires_at: DateTime<Utc>) {
        let remaining = (expires_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);

        let weak = self.self_weak.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(remaining).await;
            if let Some(inner) = weak.upgrade() {
                info!("access token lifetime elapsed, clearing session");
                inner.clear_local();
                inner.emit(AuthEvent::TokenExpired);
            }
        });

        let mut slot = self.expiry_task.lock();
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }

    fn cancel_expiry_timer(&self) {
        if let Some(handle) = self.expiry_task.lock().take() {
            handle.abort();
        }
    }

    async fn exchange_refresh_token(
        &self,
        refresh_token: String,
        dispatched_epoch: u64,
    ) -> Result<String, AuthError> {
        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
        ];

        let response = match self
            .http
            .post(self.config.token_endpoint())
            .form(&params)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                return self.fail_refresh(
                    dispatched_epoch,
                    AuthError::EndpointUnavailable(err.to_string()),
                );
            }
        };

        let status = response.status();
        if !status.is_success() {
            return self.fail_refresh(
                dispatched_epoch,
                AuthError::RefreshFailed(format!("token endpoint returned {status}")),
            );
        }

        let tokens: TokenResponse = match response.json().await {
            Ok(tokens) => tokens,
            Err(err) => {
                return self.fail_refresh(
                    dispatched_epoch,
                    AuthError::EndpointUnavailable(err.to_string()),
                );
            }
        };

        let credential = credential_from(&tokens);
        let claims = match codec::decode(&credential.access_token) {
            Ok(claims) => claims,
            Err(err) => {
                return self.fail_refresh(
                    dispatched_epoch,
                    AuthError::EndpointUnavailable(format!(
                        "issuer returned an undecodable access token: {err}"
                    )),
                );
            }
        };

        self.install_credential(&credential, &claims, Some(dispatched_epoch))?;
        debug!("token refresh succeeded");
        self.emit(AuthEvent::RefreshSucceeded);
        Ok(credential.access_token)
    }

    /// A refresh that fails ends the session, unless the session already
    /// transitioned while the exchange was in flight (nothing left to
    /// clear, the outcome is simply discarded).
    fn fail_refresh(&self, dispatched_epoch: u64, err: AuthError) -> Result<String, AuthError> {
        if self.current_epoch() == dispatched_epoch {
            self.clear_local();
            self.emit(AuthEvent::RefreshFailed);
        }
        Err(err)
    }

    /// Merge profile fields into the current state. The token-derived role
    /// set stays authoritative; the profile contributes names and email.
    fn apply_profile(&self, profile: &UserProfile) {
        let _epoch = self.epoch.lock();
        let mut state = self.session.current();
        if !state.is_authenticated {
            // Profile response landed after a logout.
            return;
        }

        if profile.email.is_some() {
            state.email = profile.email.clone();
        }
        if profile.first_name.is_some() {
            state.display_name = profile.first_name.clone();
        }
        if let Some(username) = profile.username.clone().or_else(|| profile.email.clone()) {
            state.username = Some(username);
        }
        self.session.publish(state);
    }
}

fn credential_from(tokens: &TokenResponse) -> Credential {
    Credential {
        access_token: tokens.access_token.clone(),
        refresh_token: tokens.refresh_token.clone(),
        expires_at: Utc::now() + chrono::Duration::seconds(tokens.expires_in as i64),
    }
}

fn session_state_from_claims(claims: &Claims, client_id: &str) -> SessionState {
    SessionState {
        is_authenticated: true,
        username: claims.username().map(str::to_string),
        display_name: claims.given_name.clone(),
        email: claims.email.clone(),
        roles: claims.roles(client_id),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use mockito::Matcher;

    use super::*;
    use crate::auth::codec::make_token;
    use crate::auth::store::STORE_KEY_SIZE;

    static COUNTER: AtomicU32 = AtomicU32::new(0);

    const TOKEN_PATH: &str = "/realms/prospera/protocol/openid-connect/token";

    fn test_store() -> TokenStore {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!(
            "prospera-manager-test-{}-{}.enc",
            std::process::id(),
            n
        ));
        let _ = std::fs::remove_file(&path);
        TokenStore::new(path, &[3u8; STORE_KEY_SIZE])
    }

    fn test_manager(server_url: &str) -> AuthManager {
        let config = Config {
            keycloak_base_url: server_url.to_string(),
            backend_base_url: server_url.to_string(),
            ..Config::default()
        };
        AuthManager::new(config, test_store(), reqwest::Client::new())
    }

    fn access_token(exp_offset_secs: i64, roles: &[&str]) -> String {
        make_token(&serde_json::json!({
            "preferred_username": "yahya",
            "given_name": "Yahya",
            "email": "yahya@example.com",
            "exp": Utc::now().timestamp() + exp_offset_secs,
            "realm_access": { "roles": roles },
        }))
    }

    fn token_response(access: &str, refresh: &str, expires_in: u64) -> String {
        serde_json::json!({
            "access_token": access,
            "refresh_token": refresh,
            "expires_in": expires_in,
        })
        .to_string()
    }

    fn seed_credential(manager: &AuthManager, access: &str, refresh: &str, ttl_secs: i64) {
        manager
            .inner
            .store
            .save(&Credential {
                access_token: access.to_string(),
                refresh_token: refresh.to_string(),
                expires_at: Utc::now() + chrono::Duration::seconds(ttl_secs),
            })
            .unwrap();
    }

    #[tokio::test]
    async fn login_success_publishes_authenticated_state() {
        let mut server = mockito::Server::new_async().await;
        let token = access_token(300, &["CLIENT"]);
        let mock = server
            .mock("POST", TOKEN_PATH)
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "password".into()),
                Matcher::UrlEncoded("username".into(), "yahya".into()),
            ]))
            .with_status(200)
            .with_body(token_response(&token, "refresh-1", 300))
            .create_async()
            .await;

        let manager = test_manager(&server.url());
        manager.login("yahya", "secret").await.unwrap();

        let state = manager.session_state();
        assert!(state.is_authenticated);
        assert_eq!(state.username.as_deref(), Some("yahya"));
        assert_eq!(state.roles, vec!["CLIENT"]);
        assert!(manager.is_authenticated());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn login_rejection_maps_to_invalid_credentials() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", TOKEN_PATH)
            .with_status(401)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;

        let manager = test_manager(&server.url());
        let err = manager.login("yahya", "wrong").await.unwrap_err();
        assert_eq!(err, AuthError::InvalidCredentials);
        assert!(!manager.session_state().is_authenticated);
    }

    #[tokio::test]
    async fn login_server_error_maps_to_endpoint_unavailable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", TOKEN_PATH)
            .with_status(503)
            .create_async()
            .await;

        let manager = test_manager(&server.url());
        let err = manager.login("yahya", "secret").await.unwrap_err();
        assert!(matches!(err, AuthError::EndpointUnavailable(_)));
    }

    #[tokio::test]
    async fn login_network_failure_maps_to_endpoint_unavailable() {
        // Nothing listens on this port.
        let manager = test_manager("http://127.0.0.1:9");
        let err = manager.login("yahya", "secret").await.unwrap_err();
        assert!(matches!(err, AuthError::EndpointUnavailable(_)));
    }

    #[tokio::test]
    async fn sync_is_idempotent() {
        let manager = test_manager("http://127.0.0.1:9");
        seed_credential(&manager, &access_token(300, &["CLIENT"]), "refresh-1", 300);

        manager.sync_auth_state().await;
        let first = manager.session_state();
        manager.sync_auth_state().await;
        let second = manager.session_state();

        assert!(first.is_authenticated);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn sync_with_expired_token_clears_the_store() {
        let manager = test_manager("http://127.0.0.1:9");
        seed_credential(&manager, &access_token(-10, &["CLIENT"]), "refresh-1", 300);

        assert!(!manager.is_authenticated());
        manager.sync_auth_state().await;

        assert!(!manager.session_state().is_authenticated);
        assert_eq!(manager.inner.store.read(), None);
    }

    #[tokio::test]
    async fn sync_with_malformed_token_clears_the_store() {
        let manager = test_manager("http://127.0.0.1:9");
        seed_credential(&manager, "only.two-segments", "refresh-1", 300);

        manager.sync_auth_state().await;

        assert!(!manager.session_state().is_authenticated);
        assert_eq!(manager.inner.store.read(), None);
    }

    #[tokio::test]
    async fn fresh_token_is_returned_without_a_network_exchange() {
        // No server at all: any network attempt would fail the refresh and
        // clear the session.
        let manager = test_manager("http://127.0.0.1:9");
        let token = access_token(300, &[]);
        seed_credential(&manager, &token, "refresh-1", 300);

        assert_eq!(manager.valid_access_token().await, Some(token));
        assert!(manager.inner.store.read().is_some());
    }

    #[tokio::test]
    async fn concurrent_refreshes_collapse_to_one_exchange() {
        let mut server = mockito::Server::new_async().await;
        let renewed = access_token(300, &["CLIENT"]);
        let mock = server
            .mock("POST", TOKEN_PATH)
            .match_body(Matcher::UrlEncoded(
                "grant_type".into(),
                "refresh_token".into(),
            ))
            .with_status(200)
            .with_body(token_response(&renewed, "refresh-2", 300))
            .expect(1)
            .create_async()
            .await;

        let manager = test_manager(&server.url());
        // Remaining lifetime below the slack, so refresh() must exchange.
        seed_credential(&manager, &access_token(5, &["CLIENT"]), "refresh-1", 5);

        let (first, second) = tokio::join!(manager.refresh(), manager.refresh());
        assert_eq!(first.unwrap(), renewed);
        assert_eq!(second.unwrap(), renewed);
        mock.assert_async().await;

        let stored = manager.inner.store.read().unwrap();
        assert_eq!(stored.refresh_token, "refresh-2");
    }

    #[tokio::test]
    async fn rejected_refresh_clears_the_session() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", TOKEN_PATH)
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;

        let manager = test_manager(&server.url());
        seed_credential(&manager, &access_token(5, &["CLIENT"]), "refresh-1", 5);
        manager.sync_auth_state().await;
        assert!(manager.session_state().is_authenticated);

        let mut events = manager.subscribe_events();
        let err = manager.refresh().await.unwrap_err();
        assert!(matches!(err, AuthError::RefreshFailed(_)));
        assert!(!manager.session_state().is_authenticated);
        assert_eq!(manager.inner.store.read(), None);
        assert_eq!(events.recv().await.unwrap(), AuthEvent::RefreshFailed);
    }

    #[tokio::test]
    async fn refresh_outcome_after_logout_is_discarded() {
        let manager = test_manager("http://127.0.0.1:9");
        seed_credential(&manager, &access_token(300, &["CLIENT"]), "refresh-1", 300);
        let dispatched_epoch = manager.inner.current_epoch();

        manager.logout().await;

        // A success that settles after logout must not be re-applied.
        let credential = Credential {
            access_token: access_token(300, &["CLIENT"]),
            refresh_token: "refresh-2".to_string(),
            expires_at: Utc::now() + chrono::Duration::seconds(300),
        };
        let claims = codec::decode(&credential.access_token).unwrap();
        let result =
            manager
                .inner
                .install_credential(&credential, &claims, Some(dispatched_epoch));

        assert!(matches!(result, Err(AuthError::RefreshFailed(_))));
        assert_eq!(manager.inner.store.read(), None);
        assert!(!manager.session_state().is_authenticated);
    }

    #[tokio::test]
    async fn expiry_timer_logs_out_when_the_token_lapses() {
        let mut server = mockito::Server::new_async().await;
        let token = access_token(1, &["CLIENT"]);
        server
            .mock("POST", TOKEN_PATH)
            .with_status(200)
            .with_body(token_response(&token, "refresh-1", 1))
            .create_async()
            .await;

        let manager = test_manager(&server.url());
        let mut events = manager.subscribe_events();
        manager.login("yahya", "secret").await.unwrap();
        assert!(manager.session_state().is_authenticated);
        assert_eq!(events.recv().await.unwrap(), AuthEvent::LoggedIn);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!manager.session_state().is_authenticated);
        assert_eq!(manager.inner.store.read(), None);
        assert_eq!(events.recv().await.unwrap(), AuthEvent::TokenExpired);
    }

    #[tokio::test]
    async fn profile_failure_keeps_the_token_session() {
        let mut server = mockito::Server::new_async().await;
        let token = access_token(300, &["CLIENT"]);
        server
            .mock("POST", TOKEN_PATH)
            .with_status(200)
            .with_body(token_response(&token, "refresh-1", 300))
            .create_async()
            .await;
        server
            .mock("GET", "/api/users/me")
            .with_status(500)
            .create_async()
            .await;

        let manager = test_manager(&server.url());
        manager.login("yahya", "secret").await.unwrap();
        assert!(manager.session_state().is_authenticated);
    }

    #[tokio::test]
    async fn profile_fields_win_over_token_claims() {
        let mut server = mockito::Server::new_async().await;
        let token = access_token(300, &["CLIENT"]);
        server
            .mock("POST", TOKEN_PATH)
            .with_status(200)
            .with_body(token_response(&token, "refresh-1", 300))
            .create_async()
            .await;
        server
            .mock("GET", "/api/users/me")
            .with_status(200)
            .with_body(r#"{"firstName":"Yahia","email":"yahia@prospera.tn"}"#)
            .create_async()
            .await;

        let manager = test_manager(&server.url());
        manager.login("yahya", "secret").await.unwrap();

        let state = manager.session_state();
        assert_eq!(state.display_name.as_deref(), Some("Yahia"));
        assert_eq!(state.email.as_deref(), Some("yahia@prospera.tn"));
        // Roles stay token-derived.
        assert_eq!(state.roles, vec!["CLIENT"]);
    }
}
