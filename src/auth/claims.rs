//! Opportunistic decoding of claims embedded in a bearer credential.
//!
//! Credentials are opaque strings as far as this client is concerned. Some
//! deployments issue structured tokens whose payload segment carries a
//! subject, issue/expiry times, and an embedded scope list; when that is the
//! case we read them without any signature verification. Decoded claims are
//! advisory only - they gate UI rendering, never server-side authorization.
//! A credential that does not decode is not an error: it simply carries no
//! embedded claims.

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Claims read from a structured credential's payload segment.
#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    /// Subject identifier.
    pub sub: Option<String>,
    /// Issue time, seconds since epoch.
    pub iat: Option<i64>,
    /// Expiry time, seconds since epoch.
    pub exp: Option<i64>,
    /// Embedded permission scopes, if the issuer includes them.
    #[serde(default)]
    pub scopes: Option<Vec<String>>,
}

impl Claims {
    /// Whether the credential has expired at `now`. A credential without an
    /// `exp` claim never expires locally.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.exp {
            Some(exp) => now.timestamp() >= exp,
            None => false,
        }
    }
}

/// Decode the payload segment of a structured credential.
///
/// Returns `None` for anything that is not a three-segment token with a
/// base64url JSON payload. Decoding failure degrades to "no embedded
/// claims" rather than an error.
pub fn decode_claims(token: &str) -> Option<Claims> {
    let mut segments = token.split('.');
    let _header = segments.next()?;
    let payload = segments.next()?;
    segments.next()?; // signature segment must be present
    if segments.next().is_some() {
        return None;
    }

    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload)
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}
