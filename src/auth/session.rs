//! Session state machine.
//!
//! The controller owns the client's belief about "am I signed in, with
//! what permissions, and what went wrong". State moves from `Loading` to
//! either `Authenticated` or `Unauthenticated` and may re-enter freely.
//! Verification runs either against the identity endpoint (authoritative)
//! or by decoding the stored credential's claims locally - the latter is a
//! legacy strategy whose result gates UI only; the server always remains
//! the enforcement point.
//!
//! The controller subscribes to the auth event bus: an `Unauthorized` or
//! `TokenExpired` event from any call site forces a logout, while
//! `Forbidden` leaves the session untouched (the principal is still
//! authenticated, merely disallowed).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::ApiClient;
use crate::auth::claims::decode_claims;
use crate::auth::events::{AuthBus, AuthEvent, AuthEventKind, Subscription};
use crate::auth::scopes::ScopeSet;
use crate::auth::store::CredentialStore;
use crate::config::Config;

/// Error text for a verification failure that is not a plain 401.
const VERIFY_FAILED_MSG: &str = "Unable to verify session.";

/// Error text when the dev fallback credential itself fails verification.
const DEV_FALLBACK_FAILED_MSG: &str = "Dev auto-login failed.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Verification in flight. Consumers must treat this as "no access",
    /// never as "access granted".
    Loading,
    Authenticated,
    Unauthenticated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub status: SessionStatus,
    pub scopes: ScopeSet,
    /// Banner/help text only; never used for programmatic branching.
    pub error: Option<String>,
}

impl SessionState {
    fn loading() -> Self {
        Self {
            status: SessionStatus::Loading,
            scopes: ScopeSet::new(),
            error: None,
        }
    }

    fn authenticated(scopes: ScopeSet) -> Self {
        Self {
            status: SessionStatus::Authenticated,
            scopes,
            error: None,
        }
    }

    fn unauthenticated(error: Option<String>) -> Self {
        Self {
            status: SessionStatus::Unauthenticated,
            scopes: ScopeSet::new(),
            error,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.status == SessionStatus::Authenticated
    }

    /// Whether the session grants `required`. `Loading` and
    /// `Unauthenticated` always answer no.
    pub fn allows(&self, required: &str) -> bool {
        self.is_authenticated() && self.scopes.has_scope(required)
    }

    /// Whether the session grants at least one of `required`.
    pub fn allows_any<'a, I>(&self, required: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.is_authenticated() && self.scopes.has_any_scope(required)
    }
}

/// How the controller verifies a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyStrategy {
    /// Call the identity endpoint; its permission list is authoritative.
    ServerVerify,
    /// Legacy: decode the credential's embedded claims without
    /// verification and check expiry locally.
    LocalDecode,
}

enum VerifyError {
    Unauthorized,
    Other(String),
}

struct ControllerInner {
    api: ApiClient,
    store: Arc<CredentialStore>,
    config: Config,
    strategy: VerifyStrategy,
    state: watch::Sender<SessionState>,
    /// Cycle generation for last-write-wins: a cycle that is stale by the
    /// time it settles does not write state.
    generation: AtomicU64,
    /// Highest store revision produced by this controller's own writes.
    /// The store watcher skips revisions at or below it, the way a
    /// storage event never fires in the context that wrote the value.
    seen_revision: AtomicU64,
}

/// Owns session state and drives it through login/logout/recheck.
/// Clone is cheap - clones share the same state.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<ControllerInner>,
    _subscription: Arc<Subscription>,
}

impl SessionController {
    /// Build a controller and install it as the bus subscriber. The same
    /// bus instance must be the one injected into `api`, so that auth
    /// failures on any call reach this controller.
    pub fn new(
        api: ApiClient,
        store: Arc<CredentialStore>,
        bus: &AuthBus,
        config: Config,
        strategy: VerifyStrategy,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::loading());
        let inner = Arc::new(ControllerInner {
            api,
            store,
            config,
            strategy,
            state,
            generation: AtomicU64::new(0),
            seen_revision: AtomicU64::new(0),
        });

        let weak = Arc::downgrade(&inner);
        let subscription = bus.subscribe(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.on_auth_event(event);
            }
        });

        Self {
            inner,
            _subscription: Arc::new(subscription),
        }
    }

    /// Current state snapshot.
    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Verify the stored credential and settle into a terminal state.
    /// Never fails: every outcome is a state transition.
    pub async fn check_auth(&self) {
        self.inner.run_cycle(None).await;
    }

    /// Store a credential and verify it.
    pub async fn login(&self, credential: &str) {
        self.inner.run_cycle(Some(credential)).await;
    }

    /// Clear the credential and leave the authenticated state. No network
    /// round-trip; supersedes any in-flight verification.
    pub fn logout(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.force_logout();
    }

    /// Whether the session grants `required`. See [`SessionState::allows`].
    pub fn has_scope(&self, required: &str) -> bool {
        self.inner.state.borrow().allows(required)
    }

    /// Whether the session grants at least one of `required`.
    pub fn has_any_scope<'a, I>(&self, required: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.inner.state.borrow().allows_any(required)
    }

    /// Re-run `check_auth` whenever the credential store changes, so
    /// sibling controllers sharing a store converge on credential writes.
    /// Revisions written by this controller itself are skipped: only a
    /// sibling's write warrants a recheck, and reacting to our own writes
    /// would chain verification cycles without bound.
    /// Runs until aborted or until the controller is dropped.
    pub fn spawn_store_watcher(&self) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let mut changes = self.inner.store.watch_changes();
        tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let revision = *changes.borrow_and_update();
                let Some(inner) = weak.upgrade() else { break };
                if revision <= inner.seen_revision.load(Ordering::SeqCst) {
                    continue;
                }
                debug!(revision, "Credential store changed; rechecking session");
                inner.run_cycle(None).await;
            }
        })
    }
}

impl ControllerInner {
    fn on_auth_event(&self, event: AuthEvent) {
        match event.kind {
            AuthEventKind::Unauthorized | AuthEventKind::TokenExpired => {
                info!(kind = ?event.kind, "Auth event forced logout");
                // Supersede any in-flight verification: its result must
                // not resurrect a session the server just rejected
                self.generation.fetch_add(1, Ordering::SeqCst);
                self.force_logout();
            }
            // Authorization failure, not an authentication failure: the
            // session stays as it is and the event message drives the
            // transient UI banner.
            AuthEventKind::Forbidden => {
                debug!(message = ?event.message, "Forbidden event; session unchanged");
            }
        }
    }

    fn force_logout(&self) {
        match self.store.clear() {
            Ok(revision) => self.mark_own_write(revision),
            Err(e) => warn!(error = %e, "Failed to clear credential on logout"),
        }
        self.state.send_replace(SessionState::unauthenticated(None));
    }

    /// Record a store revision this controller caused, so the store
    /// watcher does not treat it as a sibling's write.
    fn mark_own_write(&self, revision: u64) {
        self.seen_revision.fetch_max(revision, Ordering::SeqCst);
    }

    /// One verification cycle: optional credential write, `Loading`, then
    /// verify with at most one dev-fallback retry, then settle.
    async fn run_cycle(&self, login_credential: Option<&str>) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(credential) = login_credential {
            match self.store.set(credential) {
                Ok(revision) => self.mark_own_write(revision),
                Err(e) => {
                    warn!(error = %e, "Failed to store login credential");
                    self.settle(
                        generation,
                        SessionState::unauthenticated(Some(VERIFY_FAILED_MSG.to_string())),
                    );
                    return;
                }
            }
        }

        self.settle(generation, SessionState::loading());

        // The fallback guard is per cycle, not per request: it resets here
        // and nowhere else, so a misconfigured fallback credential cannot
        // retry more than once.
        let mut fallback_attempted = false;
        let outcome = loop {
            match self.verify().await {
                Ok(scopes) => break SessionState::authenticated(scopes),
                Err(VerifyError::Unauthorized) => {
                    if fallback_attempted {
                        break SessionState::unauthenticated(Some(
                            DEV_FALLBACK_FAILED_MSG.to_string(),
                        ));
                    }
                    match self.config.dev_token() {
                        Some(dev_token) => {
                            fallback_attempted = true;
                            info!("Verification failed; attempting dev auto-login");
                            // Written into the store so every subsequent
                            // call picks it up uniformly
                            match self.store.set(dev_token) {
                                Ok(revision) => self.mark_own_write(revision),
                                Err(_) => {
                                    break SessionState::unauthenticated(Some(
                                        DEV_FALLBACK_FAILED_MSG.to_string(),
                                    ));
                                }
                            }
                        }
                        // A plain 401 is not an error to surface: the user
                        // is simply not signed in
                        None => break SessionState::unauthenticated(None),
                    }
                }
                Err(VerifyError::Other(detail)) => {
                    warn!(detail = %detail, "Session verification failed");
                    break SessionState::unauthenticated(Some(VERIFY_FAILED_MSG.to_string()));
                }
            }
        };

        self.settle(generation, outcome);
    }

    async fn verify(&self) -> Result<ScopeSet, VerifyError> {
        match self.strategy {
            VerifyStrategy::ServerVerify => match self.api.fetch_identity().await {
                Ok(identity) => Ok(identity.permissions.into_iter().collect()),
                Err(e) if e.is_unauthorized() => {
                    // The 401 just cleared the store; that write is ours
                    self.mark_own_write(self.store.revision());
                    Err(VerifyError::Unauthorized)
                }
                Err(e) => Err(VerifyError::Other(e.to_string())),
            },
            VerifyStrategy::LocalDecode => {
                let Some(credential) = self.store.get() else {
                    return Err(VerifyError::Unauthorized);
                };
                match decode_claims(&credential) {
                    Some(claims) => {
                        if claims.is_expired(Utc::now()) {
                            return Err(VerifyError::Unauthorized);
                        }
                        Ok(claims.scopes.unwrap_or_default().into_iter().collect())
                    }
                    // An unstructured credential carries no claims. The dev
                    // service credential is recognized and granted the
                    // universal wildcard; anything else signs in with no
                    // scopes.
                    None => {
                        if self.config.dev_token() == Some(credential.as_str()) {
                            Ok(ScopeSet::universal())
                        } else {
                            Ok(ScopeSet::new())
                        }
                    }
                }
            }
        }
    }

    /// Write `state` unless a newer cycle has begun since `generation`.
    fn settle(&self, generation: u64, state: SessionState) {
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!("Session cycle superseded; discarding result");
            return;
        }
        self.state.send_replace(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;
    use mockito::Server;
    use std::io::Write;
    use std::sync::atomic::AtomicUsize;

    fn wired(
        server_url: &str,
        dev_token: Option<&str>,
        strategy: VerifyStrategy,
    ) -> (
        SessionController,
        Arc<CredentialStore>,
        AuthBus,
        tempfile::TempDir,
    ) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(CredentialStore::new(dir.path().to_path_buf()));
        let bus = AuthBus::new();
        let api = ApiClient::new(server_url, Arc::clone(&store), bus.clone()).expect("client");
        let config = Config::new(
            server_url,
            dev_token.map(str::to_string),
            Environment::Development,
        );
        let controller = SessionController::new(api, Arc::clone(&store), &bus, config, strategy);
        (controller, store, bus, dir)
    }

    fn controller_with(
        server_url: &str,
        dev_token: Option<&str>,
        strategy: VerifyStrategy,
    ) -> (SessionController, Arc<CredentialStore>, tempfile::TempDir) {
        let (controller, store, _bus, dir) = wired(server_url, dev_token, strategy);
        (controller, store, dir)
    }

    #[tokio::test]
    async fn test_initial_state_is_loading() {
        let (controller, _store, _dir) =
            controller_with("http://localhost:1", None, VerifyStrategy::ServerVerify);
        assert_eq!(controller.state().status, SessionStatus::Loading);
        assert!(!controller.has_scope("customers:read"));
    }

    #[tokio::test]
    async fn test_no_credential_no_fallback_settles_silently() {
        let mut server = Server::new_async().await;
        let (controller, _store, _dir) =
            controller_with(&server.url(), None, VerifyStrategy::ServerVerify);

        let mock = server
            .mock("GET", "/identity/me")
            .with_status(401)
            .with_body(r#"{"detail": "Not authenticated"}"#)
            .expect(1)
            .create_async()
            .await;

        controller.check_auth().await;

        let state = controller.state();
        assert_eq!(state.status, SessionStatus::Unauthenticated);
        assert!(state.error.is_none(), "plain 401 carries no error text");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fallback_retries_exactly_once() {
        let mut server = Server::new_async().await;
        let (controller, store, _dir) =
            controller_with(&server.url(), Some("dev-token"), VerifyStrategy::ServerVerify);

        // Both the initial attempt and the single fallback retry 401
        let mock = server
            .mock("GET", "/identity/me")
            .with_status(401)
            .with_body(r#"{"detail": "Not authenticated"}"#)
            .expect(2)
            .create_async()
            .await;

        controller.check_auth().await;

        let state = controller.state();
        assert_eq!(state.status, SessionStatus::Unauthenticated);
        assert_eq!(state.error.as_deref(), Some("Dev auto-login failed."));
        mock.assert_async().await;

        // The fallback credential was cleared again by the retry's 401
        assert!(store.get().is_none());
    }

    #[tokio::test]
    async fn test_fallback_success_authenticates() {
        let mut server = Server::new_async().await;
        let (controller, store, _dir) =
            controller_with(&server.url(), Some("dev-token"), VerifyStrategy::ServerVerify);

        let _unauthenticated = server
            .mock("GET", "/identity/me")
            .match_header("authorization", mockito::Matcher::Missing)
            .with_status(401)
            .with_body(r#"{"detail": "Not authenticated"}"#)
            .create_async()
            .await;
        let _dev = server
            .mock("GET", "/identity/me")
            .match_header("authorization", "Bearer dev-token")
            .with_status(200)
            .with_body(r#"{"id": "svc", "email": "svc@example.com", "permissions": ["*"]}"#)
            .create_async()
            .await;

        controller.check_auth().await;

        let state = controller.state();
        assert_eq!(state.status, SessionStatus::Authenticated);
        assert!(state.allows("anything:whatsoever"));
        assert_eq!(store.get().as_deref(), Some("dev-token"));
    }

    #[tokio::test]
    async fn test_logout_is_unconditional_and_local() {
        // Unreachable server: logout must not need the network
        let (controller, store, _dir) =
            controller_with("http://localhost:1", None, VerifyStrategy::ServerVerify);
        store.set("some-token").unwrap();

        controller.logout();

        let state = controller.state();
        assert_eq!(state.status, SessionStatus::Unauthenticated);
        assert!(state.error.is_none());
        assert!(store.get().is_none());
    }

    #[tokio::test]
    async fn test_server_error_surfaces_generic_message() {
        let mut server = Server::new_async().await;
        let (controller, _store, _dir) =
            controller_with(&server.url(), None, VerifyStrategy::ServerVerify);

        let _mock = server
            .mock("GET", "/identity/me")
            .with_status(500)
            .with_body(r#"{"detail": "boom"}"#)
            .create_async()
            .await;

        controller.check_auth().await;

        let state = controller.state();
        assert_eq!(state.status, SessionStatus::Unauthenticated);
        assert_eq!(state.error.as_deref(), Some("Unable to verify session."));
    }

    #[tokio::test]
    async fn test_forced_logout_supersedes_inflight_verification() {
        let mut server = Server::new_async().await;
        let (controller, store, bus, _dir) =
            wired(&server.url(), None, VerifyStrategy::ServerVerify);
        store.set("tok").unwrap();

        // The identity response is parked long enough for the logout to
        // land first
        let _me = server
            .mock("GET", "/identity/me")
            .with_status(200)
            .with_chunked_body(|writer| {
                std::thread::sleep(std::time::Duration::from_millis(300));
                writer.write_all(
                    br#"{"id": "u-1", "email": "pat@example.com", "permissions": ["*"]}"#,
                )
            })
            .create_async()
            .await;

        let in_flight = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.check_auth().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        // A business call elsewhere hit a 401 while verification was in
        // flight
        bus.publish(AuthEvent::new(AuthEventKind::Unauthorized, None));
        assert_eq!(controller.state().status, SessionStatus::Unauthenticated);

        in_flight.await.unwrap();

        let state = controller.state();
        assert_eq!(state.status, SessionStatus::Unauthenticated);
        assert!(state.scopes.is_empty());
        assert!(store.get().is_none());
    }

    #[tokio::test]
    async fn test_verification_401_does_not_broadcast() {
        let mut server = Server::new_async().await;
        let (controller, _store, bus, _dir) =
            wired(&server.url(), Some("dev-token"), VerifyStrategy::ServerVerify);

        // Replaces the controller's own subscription; this flow settles
        // through the cycle, not through bus-driven logout
        let published = Arc::new(AtomicUsize::new(0));
        let published_clone = Arc::clone(&published);
        let _sub = bus.subscribe(move |_| {
            published_clone.fetch_add(1, Ordering::SeqCst);
        });

        let _mock = server
            .mock("GET", "/identity/me")
            .with_status(401)
            .with_body(r#"{"detail": "Not authenticated"}"#)
            .expect(2)
            .create_async()
            .await;

        controller.check_auth().await;

        let state = controller.state();
        assert_eq!(state.status, SessionStatus::Unauthenticated);
        assert_eq!(state.error.as_deref(), Some("Dev auto-login failed."));
        assert_eq!(published.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_local_decode_strategy_reads_embedded_scopes() {
        use base64::Engine;
        let engine = &base64::engine::general_purpose::URL_SAFE_NO_PAD;
        let exp = Utc::now().timestamp() + 3600;
        let payload = format!(r#"{{"sub":"u-1","exp":{exp},"scopes":["invoices:*"]}}"#);
        let token = format!(
            "{}.{}.{}",
            engine.encode(b"{}"),
            engine.encode(payload.as_bytes()),
            engine.encode(b"sig")
        );

        let (controller, _store, _dir) =
            controller_with("http://localhost:1", None, VerifyStrategy::LocalDecode);

        controller.login(&token).await;

        let state = controller.state();
        assert_eq!(state.status, SessionStatus::Authenticated);
        assert!(state.allows("invoices:read"));
        assert!(state.allows("invoices:void"));
        assert!(!state.allows("payroll:read"));
    }

    #[tokio::test]
    async fn test_local_decode_expired_token_signs_out() {
        use base64::Engine;
        let engine = &base64::engine::general_purpose::URL_SAFE_NO_PAD;
        let exp = Utc::now().timestamp() - 60;
        let payload = format!(r#"{{"sub":"u-1","exp":{exp}}}"#);
        let token = format!(
            "{}.{}.{}",
            engine.encode(b"{}"),
            engine.encode(payload.as_bytes()),
            engine.encode(b"sig")
        );

        let (controller, _store, _dir) =
            controller_with("http://localhost:1", None, VerifyStrategy::LocalDecode);

        controller.login(&token).await;
        assert_eq!(controller.state().status, SessionStatus::Unauthenticated);
    }

    #[tokio::test]
    async fn test_local_decode_opaque_token_has_no_scopes() {
        let (controller, _store, _dir) =
            controller_with("http://localhost:1", None, VerifyStrategy::LocalDecode);

        controller.login("opaque-session-credential").await;

        let state = controller.state();
        assert_eq!(state.status, SessionStatus::Authenticated);
        assert!(state.scopes.is_empty());
        assert!(!state.allows("customers:read"));
    }

    #[tokio::test]
    async fn test_local_decode_dev_credential_gets_wildcard() {
        let (controller, _store, _dir) = controller_with(
            "http://localhost:1",
            Some("dev-service-token"),
            VerifyStrategy::LocalDecode,
        );

        controller.login("dev-service-token").await;

        let state = controller.state();
        assert_eq!(state.status, SessionStatus::Authenticated);
        assert!(state.allows("anything:whatsoever"));
    }
}
