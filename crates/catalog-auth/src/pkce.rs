//! PKCE (Proof Key for Code Exchange) implementation per RFC 7636
//!
//! Generates the code verifier and S256 challenge for one authorization
//! round trip. The verifier stays in session storage until the callback
//! redeems it; only the challenge leaves the client in the authorization
//! redirect.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use common::Secret;
use rand::RngExt;
use sha2::{Digest, Sha256};
use url::Url;

use crate::config::OAuthConfig;

/// Random bytes behind each verifier. 64 bytes encode to 86 characters,
/// inside the 43-128 range RFC 7636 allows.
const VERIFIER_BYTES: usize = 64;

/// Generate a cryptographically random PKCE code verifier.
///
/// Drawn from the thread-local CSPRNG and encoded as URL-safe base64
/// without padding.
pub fn generate_verifier() -> String {
    let mut bytes = [0u8; VERIFIER_BYTES];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Compute the S256 code challenge from a verifier.
///
/// `challenge = BASE64URL(SHA256(verifier))`, padding stripped.
pub fn generate_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Verifier and challenge for a single authorization attempt.
#[derive(Debug, Clone)]
pub struct PkcePair {
    pub verifier: Secret<String>,
    pub challenge: String,
}

impl PkcePair {
    pub fn generate() -> Self {
        let verifier = generate_verifier();
        let challenge = generate_challenge(&verifier);
        Self {
            verifier: Secret::new(verifier),
            challenge,
        }
    }
}

/// Build the authorization-endpoint redirect URL.
pub fn build_authorization_url(config: &OAuthConfig, challenge: &str) -> Url {
    let mut url = config.authorize_endpoint.clone();
    url.query_pairs_mut()
        .append_pair("client_id", &config.client_id)
        .append_pair("response_type", "code")
        .append_pair("redirect_uri", config.redirect_uri.as_str())
        .append_pair("code_challenge_method", "S256")
        .append_pair("code_challenge", challenge)
        .append_pair("scope", &config.scopes);
    url
}
