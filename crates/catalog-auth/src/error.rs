//! Error types for the credential lifecycle

/// Errors from authorization, token exchange and refresh.
///
/// `Clone` so a single coalesced refresh outcome can be handed to every
/// caller waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("no pending authorization: callback received without a matching login")]
    MissingVerifier,

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("refresh denied: {0}")]
    RefreshDenied(String),

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("invalid OAuth configuration: {0}")]
    InvalidConfig(String),
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by a storage backend.
///
/// Never surfaces past [`crate::CredentialStore`]: the store logs it and
/// reports "no credential" instead.
#[derive(Debug, thiserror::Error)]
#[error("storage {operation} failed for {key}: {reason}")]
pub struct StorageError {
    pub operation: &'static str,
    pub key: String,
    pub reason: String,
}

impl StorageError {
    pub fn new(operation: &'static str, key: &str, reason: impl ToString) -> Self {
        Self {
            operation,
            key: key.to_owned(),
            reason: reason.to_string(),
        }
    }
}
