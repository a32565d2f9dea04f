//! REST API client module for the LedgerDesk platform.
//!
//! This module provides the `ApiClient` used by every business screen for
//! authenticated calls, and the `ApiError` taxonomy they handle. Auth
//! failures are classified here and routed to the auth event bus so that
//! screens never re-implement session handling.

pub mod client;
pub mod error;

pub use client::{ApiClient, Identity};
pub use error::ApiError;
