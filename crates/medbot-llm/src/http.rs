//! Shared HTTP client construction for consistent timeout and TLS configuration.

use std::time::Duration;

use crate::error::LlmError;

/// Create a shared HTTP client with the standard `MedBot` configuration.
///
/// Config: 30s connect timeout, `request_timeout` per request, rustls TLS,
/// `medbot/{version}` user-agent, redirect limit 10.
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialised.
pub fn build_client(request_timeout: Duration) -> Result<reqwest::Client, LlmError> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .timeout(request_timeout)
        .user_agent(concat!("medbot/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .map_err(LlmError::Http)
}

/// Client with the default 60s request timeout.
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialised.
pub fn default_client() -> Result<reqwest::Client, LlmError> {
    build_client(Duration::from_secs(60))
}
