//! Client-side session and permission-scope management for the LedgerDesk
//! back-office platform.
//!
//! Business screens consume three things from this crate: an [`ApiClient`]
//! for typed calls against the backend, a [`SessionController`] that owns
//! the sign-in state machine, and [`ScopeSet`] evaluation for gating
//! rendering and actions. An [`AuthBus`] instance wires the first two
//! together so that a 401 or 403 anywhere in the app propagates into
//! session state without every screen re-implementing that logic.
//!
//! Everything this layer decides is advisory: locally decoded claims and
//! cached permission lists gate UI only. The server is the sole
//! enforcement point for authorization.
//!
//! # Wiring
//!
//! ```no_run
//! use std::sync::Arc;
//! use ledgerdesk::{ApiClient, AuthBus, Config, CredentialStore, SessionController, VerifyStrategy};
//!
//! # async fn wire() -> anyhow::Result<()> {
//! let config = Config::from_env();
//! let store = Arc::new(CredentialStore::at_default_location()?);
//! let bus = AuthBus::new();
//! let api = ApiClient::new(&config.api_base_url, Arc::clone(&store), bus.clone())?;
//! let session = SessionController::new(
//!     api.clone(),
//!     store,
//!     &bus,
//!     config,
//!     VerifyStrategy::ServerVerify,
//! );
//!
//! session.spawn_store_watcher();
//! session.check_auth().await;
//!
//! if session.has_scope("customers:read") {
//!     // render the customers screen
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;

pub use api::{ApiClient, ApiError, Identity};
pub use auth::{
    scope_label, AuthBus, AuthEvent, AuthEventKind, CredentialStore, ScopeSet, SessionController,
    SessionState, SessionStatus, Subscription, VerifyStrategy,
};
pub use config::{Config, Environment};
