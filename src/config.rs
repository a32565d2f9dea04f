//! Client configuration sourced from the environment.
//!
//! Two settings matter to this layer: where the LedgerDesk API lives, and
//! whether a development fallback credential is available. The fallback is
//! only ever honored outside production-like environments.

/// Default API origin for local development.
const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Environment variable naming the API origin.
const API_URL_VAR: &str = "LEDGERDESK_API_URL";

/// Environment variable carrying an optional dev/service fallback credential.
const DEV_TOKEN_VAR: &str = "LEDGERDESK_DEV_TOKEN";

/// Environment variable naming the deployment environment.
const ENVIRONMENT_VAR: &str = "LEDGERDESK_ENV";

/// Deployment environment. Anything that is not production counts as
/// development for the purpose of the dev fallback credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_base_url: String,
    pub environment: Environment,
    dev_token: Option<String>,
}

impl Config {
    pub fn new(
        api_base_url: impl Into<String>,
        dev_token: Option<String>,
        environment: Environment,
    ) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            environment,
            dev_token,
        }
    }

    /// Build a config from `LEDGERDESK_*` environment variables.
    pub fn from_env() -> Self {
        let api_base_url =
            std::env::var(API_URL_VAR).unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let dev_token = std::env::var(DEV_TOKEN_VAR).ok().filter(|t| !t.is_empty());
        let environment = match std::env::var(ENVIRONMENT_VAR).as_deref() {
            Ok("production") => Environment::Production,
            _ => Environment::Development,
        };
        Self {
            api_base_url,
            environment,
            dev_token,
        }
    }

    /// The dev fallback credential, if configured. Always `None` in
    /// production regardless of the environment variable.
    pub fn dev_token(&self) -> Option<&str> {
        match self.environment {
            Environment::Production => None,
            Environment::Development => self.dev_token.as_deref(),
        }
    }
}
