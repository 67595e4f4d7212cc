//! Catalog OAuth credential lifecycle
//!
//! PKCE authorization, token exchange and refresh, and session-scoped
//! credential storage for a public client of the music catalog provider.
//! The crate knows nothing about the catalog API itself; request
//! interception lives in `catalog-client`.
//!
//! Credential flow:
//! 1. `AuthSession::login()` stores a fresh verifier and navigates to the
//!    authorization URL built by `pkce::build_authorization_url()`
//! 2. The redirect lands on `AuthSession::complete_redirect()`, which
//!    redeems the code via `token::exchange_code()`
//! 3. The credential is persisted through `credentials::CredentialStore`
//! 4. `AuthSession::refresh()` exchanges the refresh token when the access
//!    token expires or the API rejects it; concurrent callers share one call
//! 5. Any refresh failure, or `AuthSession::logout()`, ends the session

pub mod callback;
pub mod config;
pub mod credentials;
pub mod error;
pub mod pkce;
pub mod session;
pub mod token;

#[cfg(test)]
mod test_support;

pub use callback::{CallbackOutcome, CallbackParams};
pub use config::{OAuthConfig, StorageKeys, redirect_uri_for_origin};
pub use credentials::{
    Credential, CredentialStore, FileStorage, MemoryStorage, SessionStorage, now_millis,
};
pub use error::{Error, Result, StorageError};
pub use pkce::{PkcePair, build_authorization_url, generate_challenge, generate_verifier};
pub use session::{AuthSession, AuthState, Navigator, RecordingNavigator};
pub use token::{TokenResponse, exchange_code, refresh_token};
