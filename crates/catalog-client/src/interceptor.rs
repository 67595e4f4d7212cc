//! Request auth interceptor
//!
//! Every request addressed to the protected API origin goes through
//! [`AuthInterceptor::execute`]:
//!
//! 1. Without a valid credential, refresh first. If that fails the session
//!    is logged out and the request is never sent.
//! 2. Attach `Authorization: Bearer <access_token>` and send.
//! 3. On 401, refresh once and replay the request once. A successful replay
//!    is returned; any failed replay logs the session out. A request whose
//!    body can't be replayed gets the refresh but keeps its 401.
//!
//! Requests to any other origin are sent untouched.

use catalog_auth::{AuthSession, Credential};
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use tracing::{Instrument, debug, info, info_span, warn};
use url::Url;

use crate::error::{Error, Result, transport};
use crate::metrics::{self, RefreshTrigger};

/// Wraps a `reqwest::Client` with the session's bearer credential.
#[derive(Clone)]
pub struct AuthInterceptor {
    session: AuthSession,
    client: reqwest::Client,
    protected: Url,
}

impl AuthInterceptor {
    /// Intercept requests sharing `api_base`'s scheme, host and port.
    pub fn new(session: AuthSession, client: reqwest::Client, api_base: &Url) -> Self {
        Self {
            session,
            client,
            protected: api_base.clone(),
        }
    }

    pub fn session(&self) -> &AuthSession {
        &self.session
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn is_protected(&self, url: &Url) -> bool {
        url.scheme() == self.protected.scheme()
            && url.host_str() == self.protected.host_str()
            && url.port_or_known_default() == self.protected.port_or_known_default()
    }

    /// Send `request`, authenticating it if it targets the protected origin.
    pub async fn execute(&self, request: reqwest::Request) -> Result<reqwest::Response> {
        if !self.is_protected(request.url()) {
            debug!(host = ?request.url().host_str(), "unprotected host, sending as is");
            return self.client.execute(request).await.map_err(transport);
        }

        let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
        let span = info_span!(
            "catalog_request",
            request_id = %request_id,
            method = %request.method(),
            path = %request.url().path(),
        );
        self.execute_protected(request).instrument(span).await
    }

    async fn execute_protected(&self, mut request: reqwest::Request) -> Result<reqwest::Response> {
        let (credential, refreshed) = match self.session.valid_credential() {
            Some(credential) => (credential, false),
            None => {
                debug!("no valid credential, refreshing before send");
                let result = self.session.ensure_fresh().await;
                metrics::record_refresh(RefreshTrigger::PreSend, result.is_ok());
                match result {
                    Ok(credential) => (credential, true),
                    Err(e) => return Err(self.force_logout(e.to_string())),
                }
            }
        };

        let replay = request.try_clone();
        authorize(&mut request, &credential)?;
        let response = self.client.execute(request).await.map_err(transport)?;

        if response.status() != StatusCode::UNAUTHORIZED {
            metrics::record_request(response.status().as_u16());
            return Ok(response);
        }

        if refreshed {
            warn!("freshly issued token rejected by the API");
            metrics::record_request(response.status().as_u16());
            return Err(self.force_logout("access token rejected right after refresh".into()));
        }

        let Some(mut replay) = replay else {
            metrics::record_request(response.status().as_u16());
            warn!("request body is not replayable, refreshing without retry");
            self.refresh_after_rejection(&credential).await?;
            return Ok(response);
        };

        let credential = self.refresh_after_rejection(&credential).await?;
        metrics::record_auth_retry();
        authorize(&mut replay, &credential)?;
        let response = match self.client.execute(replay).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "retried request failed");
                self.session.logout();
                return Err(transport(e));
            }
        };

        let status = response.status();
        metrics::record_request(status.as_u16());
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(self.force_logout("access token rejected after refresh".into()));
        }

        warn!(status = status.as_u16(), "retried request failed, logging out");
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        self.session.logout();
        Err(Error::Status {
            status: status.as_u16(),
            body,
        })
    }

    /// Refresh after the API rejected `rejected`. A failed refresh ends the
    /// session.
    async fn refresh_after_rejection(&self, rejected: &Credential) -> Result<Credential> {
        info!("API rejected access token, refreshing");
        let result = self
            .session
            .refresh_rejected(rejected.access_token.as_str())
            .await;
        metrics::record_refresh(RefreshTrigger::Unauthorized, result.is_ok());
        result.map_err(|e| self.force_logout(e.to_string()))
    }

    fn force_logout(&self, reason: String) -> Error {
        info!(reason = %reason, "forcing logout");
        self.session.logout();
        Error::AuthenticationRequired(reason)
    }
}

fn authorize(request: &mut reqwest::Request, credential: &Credential) -> Result<()> {
    let mut value =
        HeaderValue::from_str(&format!("Bearer {}", credential.access_token.as_str()))
            .map_err(|e| Error::Http(format!("access token is not a valid header value: {e}")))?;
    value.set_sensitive(true);
    request.headers_mut().insert(AUTHORIZATION, value);
    Ok(())
}
