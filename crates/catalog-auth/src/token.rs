//! OAuth token exchange and refresh
//!
//! Handles the two token endpoint interactions:
//! 1. Authorization code exchange (completes the PKCE flow)
//! 2. Token refresh (before a request or after a 401)
//!
//! Both POST `application/x-www-form-urlencoded` bodies to the configured
//! token endpoint. A public client sends its `client_id` and never a secret.
//! Every call is bounded by `OAuthConfig::token_timeout`.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::OAuthConfig;
use crate::error::{Error, Result};

/// Response from the token endpoint for both exchange and refresh.
///
/// `expires_in` is a delta in seconds from the response time. Providers that
/// reuse refresh tokens omit `refresh_token` on refresh.
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Seconds until the access token expires (delta, not absolute)
    pub expires_in: u64,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Exchange an authorization code for tokens.
///
/// Every failure mode (transport, timeout, non-2xx, malformed body) is a
/// `TokenExchange` error surfaced to the login flow.
pub async fn exchange_code(
    client: &reqwest::Client,
    config: &OAuthConfig,
    code: &str,
    verifier: &str,
) -> Result<TokenResponse> {
    debug!(grant_type = "authorization_code", "calling token endpoint");
    let response = client
        .post(config.token_endpoint.clone())
        .timeout(config.token_timeout())
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", config.redirect_uri.as_str()),
            ("client_id", config.client_id.as_str()),
            ("code_verifier", verifier),
        ])
        .send()
        .await
        .map_err(|e| Error::TokenExchange(format!("token exchange request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(Error::TokenExchange(format!(
            "token endpoint returned {status}: {body}"
        )));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid token response: {e}")))
}

/// Refresh an access token using a refresh token.
///
/// A 4xx answer means the provider rejected the refresh token (revoked,
/// already rotated, unknown client) and maps to `RefreshDenied`. Transport
/// failures, timeouts and 5xx answers map to `Http`.
pub async fn refresh_token(
    client: &reqwest::Client,
    config: &OAuthConfig,
    refresh: &str,
) -> Result<TokenResponse> {
    debug!(grant_type = "refresh_token", "calling token endpoint");
    let response = client
        .post(config.token_endpoint.clone())
        .timeout(config.token_timeout())
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh),
            ("client_id", config.client_id.as_str()),
        ])
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                Error::Http(format!("token refresh timed out: {e}"))
            } else {
                Error::Http(format!("token refresh request failed: {e}"))
            }
        })?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));

        if status.is_client_error() {
            return Err(Error::RefreshDenied(format!(
                "refresh token rejected ({status}): {body}"
            )));
        }

        return Err(Error::Http(format!(
            "token refresh returned {status}: {body}"
        )));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::Http(format!("invalid refresh response: {e}")))
}
