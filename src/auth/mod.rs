//! Session and permission management.
//!
//! This module provides:
//! - `CredentialStore`: persistent, change-notifying bearer credential storage
//! - `AuthBus`: single-slot event channel for auth failures
//! - `SessionController`: the sign-in state machine
//! - `ScopeSet`: permission-scope evaluation with wildcard support
//! - claims: opportunistic, unverified decoding of structured credentials

pub mod claims;
pub mod events;
pub mod scopes;
pub mod session;
pub mod store;

pub use claims::{decode_claims, Claims};
pub use events::{AuthBus, AuthEvent, AuthEventKind, Subscription};
pub use scopes::{scope_label, ScopeSet};
pub use session::{SessionController, SessionState, SessionStatus, VerifyStrategy};
pub use store::CredentialStore;
