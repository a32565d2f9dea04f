use serde::Deserialize;
use thiserror::Error;

/// Error envelope returned by all LedgerDesk endpoints on non-2xx.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    detail: String,
}

#[derive(Error, Debug)]
pub enum ApiError {
    /// 401. The Display string is fixed and user-safe; the raw server
    /// detail travels on the published auth event instead.
    #[error("Authentication required. Please sign in again.")]
    Unauthorized,

    /// 403. Fixed, user-safe Display string; raw detail on the event.
    #[error("Access denied. You do not have permission to perform this action.")]
    Forbidden,

    /// Any other non-2xx status, carrying the parsed server detail.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// A 2xx response whose body failed to decode.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The request never reached or returned from the server. Never
    /// routed through the auth event bus.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl ApiError {
    /// The HTTP status this error corresponds to, when there is one.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Unauthorized => Some(401),
            ApiError::Forbidden => Some(403),
            ApiError::Http { status, .. } => Some(*status),
            ApiError::Network(e) => e.status().map(|s| s.as_u16()),
            ApiError::InvalidResponse(_) => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }

    pub fn is_forbidden(&self) -> bool {
        self.status() == Some(403)
    }
}

/// Parse the `{ "detail": ... }` envelope, falling back to a generic
/// `HTTP <status>` message when the body is absent or malformed.
pub(crate) fn parse_detail(status: u16, body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body)
        .map(|envelope| envelope.detail)
        .unwrap_or_else(|_| format!("HTTP {status}"))
}
