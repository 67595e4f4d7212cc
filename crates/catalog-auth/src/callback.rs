//! Redirect callback handling
//!
//! The provider returns to the redirect URI with either `?code=...` or
//! `?error=...&error_description=...`. Parsing is separate from redemption so
//! any front end (loopback listener, pasted URL) can feed the same session.

use std::collections::HashMap;

use tracing::{info, warn};
use url::Url;

use crate::error::Error;
use crate::session::AuthSession;

/// What the redirect carried back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackParams {
    Code(String),
    Denied {
        error: String,
        description: Option<String>,
    },
    Missing,
}

impl CallbackParams {
    /// Parse a raw query string (without the leading `?`).
    pub fn from_query(query: &str) -> Self {
        let params: HashMap<String, String> = url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();
        Self::from_pairs(params)
    }

    pub fn from_url(url: &Url) -> Self {
        Self::from_pairs(url.query_pairs().into_owned().collect())
    }

    fn from_pairs(mut params: HashMap<String, String>) -> Self {
        if let Some(error) = params.remove("error").filter(|e| !e.is_empty()) {
            return CallbackParams::Denied {
                error,
                description: params.remove("error_description"),
            };
        }
        match params.remove("code").filter(|c| !c.is_empty()) {
            Some(code) => CallbackParams::Code(code),
            None => CallbackParams::Missing,
        }
    }
}

/// Result of landing on the redirect URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    LoggedIn,
    Unauthenticated { reason: String },
}

impl CallbackOutcome {
    pub fn is_logged_in(&self) -> bool {
        matches!(self, CallbackOutcome::LoggedIn)
    }
}

impl AuthSession {
    /// Finish an authorization round trip from parsed redirect parameters.
    ///
    /// Never fails: every problem becomes `Unauthenticated` with a reason
    /// suitable for showing to the user. A denied or code-less redirect also discards
    /// the pending verifier.
    pub async fn complete_redirect(&self, params: CallbackParams) -> CallbackOutcome {
        match params {
            CallbackParams::Code(code) => match self.handle_callback(&code).await {
                Ok(()) => CallbackOutcome::LoggedIn,
                Err(e @ Error::MissingVerifier) => {
                    warn!("callback arrived without a pending authorization");
                    CallbackOutcome::Unauthenticated {
                        reason: e.to_string(),
                    }
                }
                Err(e) => CallbackOutcome::Unauthenticated {
                    reason: e.to_string(),
                },
            },
            CallbackParams::Denied { error, description } => {
                info!(error = %error, "authorization denied by provider");
                self.cancel_authorization();
                let reason = match description {
                    Some(description) => format!("authorization denied: {error} ({description})"),
                    None => format!("authorization denied: {error}"),
                };
                CallbackOutcome::Unauthenticated { reason }
            }
            CallbackParams::Missing => {
                warn!("callback carried neither a code nor an error");
                self.cancel_authorization();
                CallbackOutcome::Unauthenticated {
                    reason: "callback did not include an authorization code".into(),
                }
            }
        }
    }
}
