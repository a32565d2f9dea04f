//! HTTP client for the LedgerDesk API.
//!
//! Every call reads the current credential from the [`CredentialStore`]
//! and attaches it as a bearer token; without one, the request rides on
//! the client's ambient cookie jar instead. Bearer and cookie auth are
//! mutually exclusive per call, so bearer requests go through a jarless
//! client and never carry stale cookies.
//!
//! Authentication and authorization failures are classified here: a 401
//! always clears the credential store, and a failing 401/403 business call
//! publishes exactly one event on the [`AuthBus`] before the error is
//! returned to the caller. Identity verification is the exception: its
//! failures go back to the session controller alone, which settles state
//! from the result itself.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use crate::auth::events::{AuthBus, AuthEvent, AuthEventKind};
use crate::auth::store::CredentialStore;

use super::error::{parse_detail, ApiError};

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Path of the identity-verification endpoint.
const IDENTITY_PATH: &str = "/identity/me";

/// The signed-in principal as reported by the identity endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Identity {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// API client for LedgerDesk.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    /// Used when a bearer credential is attached.
    bearer_client: Client,
    /// Used for unauthenticated calls; carries the ambient cookie jar.
    cookie_client: Client,
    base_url: String,
    store: Arc<CredentialStore>,
    bus: AuthBus,
}

impl ApiClient {
    pub fn new(
        base_url: impl Into<String>,
        store: Arc<CredentialStore>,
        bus: AuthBus,
    ) -> Result<Self, ApiError> {
        let bearer_client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        let cookie_client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .cookie_store(true)
            .build()?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            bearer_client,
            cookie_client,
            base_url,
            store,
            bus,
        })
    }

    /// Issue a GET request. Query pairs with empty values are dropped.
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let mut request = self.request(reqwest::Method::GET, path);
        let query: Vec<(&str, &str)> = query
            .iter()
            .filter(|(_, value)| !value.is_empty())
            .copied()
            .collect();
        if !query.is_empty() {
            request = request.query(&query);
        }
        self.execute(request).await
    }

    /// Issue a POST request with a JSON body.
    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let request = self.request(reqwest::Method::POST, path).json(body);
        self.execute(request).await
    }

    /// Verify the current credential and fetch the authoritative
    /// permission list. Failures are returned without touching the bus:
    /// the session controller drives this call and owns the resulting
    /// state transition, so a broadcast would report the same failure
    /// twice.
    pub async fn fetch_identity(&self) -> Result<Identity, ApiError> {
        let request = self.request(reqwest::Method::GET, IDENTITY_PATH);
        self.dispatch(request, false).await
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        match self.store.get() {
            Some(credential) => self.bearer_client.request(method, url).bearer_auth(credential),
            None => self.cookie_client.request(method, url),
        }
    }

    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        self.dispatch(request, true).await
    }

    /// Send a request and decode the response. `publish` controls whether
    /// auth failures are broadcast on the bus; classification and the 401
    /// store clear happen either way.
    async fn dispatch<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        publish: bool,
    ) -> Result<T, ApiError> {
        let response = request.send().await?;
        let status = response.status();

        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| ApiError::InvalidResponse(e.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        let message = parse_detail(status.as_u16(), &body);
        debug!(status = %status, message = %message, "API call failed");

        match status.as_u16() {
            401 => {
                if let Err(e) = self.store.clear() {
                    warn!(error = %e, "Failed to clear credential after 401");
                }
                if publish {
                    let kind = if message.to_ascii_lowercase().contains("expired") {
                        AuthEventKind::TokenExpired
                    } else {
                        AuthEventKind::Unauthorized
                    };
                    self.bus.publish(AuthEvent::new(kind, Some(message)));
                }
                Err(ApiError::Unauthorized)
            }
            403 => {
                // Still authenticated, merely disallowed: credential stays
                if publish {
                    self.bus
                        .publish(AuthEvent::new(AuthEventKind::Forbidden, Some(message)));
                }
                Err(ApiError::Forbidden)
            }
            _ => Err(ApiError::Http {
                status: status.as_u16(),
                message,
            }),
        }
    }
}
