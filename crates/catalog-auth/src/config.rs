//! OAuth client configuration
//!
//! Public client settings for the catalog provider. A PKCE public client
//! holds no client secret: the client ID and redirect URI identify the
//! application, and the verifier proves possession during code exchange.

use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::{Error, Result};

/// Authorization endpoint of the catalog provider.
pub const DEFAULT_AUTHORIZE_ENDPOINT: &str = "https://accounts.spotify.com/authorize";

/// Token endpoint for code exchange and token refresh.
pub const DEFAULT_TOKEN_ENDPOINT: &str = "https://accounts.spotify.com/api/token";

/// Loopback callback used when neither a redirect URI nor an origin is set.
pub const DEFAULT_REDIRECT_URI: &str = "http://127.0.0.1:4200/callback";

/// Scopes requested during authorization.
pub const DEFAULT_SCOPES: &str = "user-read-private user-read-email";

/// Tokens are treated as expired this many seconds before the provider
/// would reject them.
pub const EXPIRY_SAFETY_MARGIN_SECS: u64 = 60;

/// Port assumed for a loopback origin that doesn't name one.
const DEFAULT_LOOPBACK_PORT: u16 = 4200;

/// OAuth client settings, usually read from the `[oauth]` config section.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: Url,
    #[serde(default = "default_scopes")]
    pub scopes: String,
    #[serde(default = "default_authorize_endpoint")]
    pub authorize_endpoint: Url,
    #[serde(default = "default_token_endpoint")]
    pub token_endpoint: Url,
    /// Upper bound for a single token-endpoint call
    #[serde(default = "default_token_timeout")]
    pub token_timeout_secs: u64,
}

fn default_scopes() -> String {
    DEFAULT_SCOPES.to_string()
}

fn default_redirect_uri() -> Url {
    Url::parse(DEFAULT_REDIRECT_URI).expect("default redirect URI is a valid URL")
}

fn default_authorize_endpoint() -> Url {
    Url::parse(DEFAULT_AUTHORIZE_ENDPOINT).expect("default authorize endpoint is a valid URL")
}

fn default_token_endpoint() -> Url {
    Url::parse(DEFAULT_TOKEN_ENDPOINT).expect("default token endpoint is a valid URL")
}

fn default_token_timeout() -> u64 {
    10
}

impl OAuthConfig {
    /// Config for `client_id` against the default provider endpoints.
    pub fn new(client_id: impl Into<String>, redirect_uri: Url) -> Self {
        Self {
            client_id: client_id.into(),
            redirect_uri,
            scopes: default_scopes(),
            authorize_endpoint: default_authorize_endpoint(),
            token_endpoint: default_token_endpoint(),
            token_timeout_secs: default_token_timeout(),
        }
    }

    /// Point both provider endpoints somewhere else (local mocks, other tenants).
    pub fn with_endpoints(mut self, authorize_endpoint: Url, token_endpoint: Url) -> Self {
        self.authorize_endpoint = authorize_endpoint;
        self.token_endpoint = token_endpoint;
        self
    }

    pub fn token_timeout(&self) -> Duration {
        Duration::from_secs(self.token_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(Error::InvalidConfig("client_id must not be empty".into()));
        }
        for (name, url) in [
            ("authorize_endpoint", &self.authorize_endpoint),
            ("token_endpoint", &self.token_endpoint),
            ("redirect_uri", &self.redirect_uri),
        ] {
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(Error::InvalidConfig(format!(
                    "{name} must use http or https, got: {url}"
                )));
            }
        }
        if self.token_timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "token_timeout_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Derive the callback URI for an application origin.
///
/// The provider only accepts loopback redirects on the literal address, so
/// `localhost` and `[::1]` origins are rewritten to `127.0.0.1`.
pub fn redirect_uri_for_origin(origin: &Url) -> Result<Url> {
    let is_loopback = matches!(origin.host_str(), Some("localhost") | Some("[::1]"));
    let uri = if is_loopback {
        let port = origin.port().unwrap_or(DEFAULT_LOOPBACK_PORT);
        format!("http://127.0.0.1:{port}/callback")
    } else {
        format!("{}/callback", origin.origin().ascii_serialization())
    };
    Url::parse(&uri).map_err(|e| Error::InvalidConfig(format!("redirect uri {uri}: {e}")))
}

/// Session storage keys for the persisted credential and pending verifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageKeys {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: String,
    pub code_verifier: String,
}

impl Default for StorageKeys {
    fn default() -> Self {
        Self {
            access_token: "spotify_token".into(),
            refresh_token: "spotify_refresh_token".into(),
            expires_at: "spotify_token_expiry".into(),
            code_verifier: "pkce_code_verifier".into(),
        }
    }
}
