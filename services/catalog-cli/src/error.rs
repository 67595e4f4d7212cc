//! CLI lifecycle errors

use thiserror::Error;

/// Failures of the interactive login flow.
///
/// API and configuration errors keep their library types and are wrapped
/// with `anyhow` context in `main`.
#[derive(Error, Debug)]
pub enum Error {
    #[error("callback listener failed: {0}")]
    CallbackServer(String),

    #[error("no authorization callback received within {0}s")]
    CallbackTimeout(u64),

    #[error("authorization did not complete: {0}")]
    Unauthenticated(String),
}

/// Result alias using the CLI Error
pub type Result<T> = std::result::Result<T, Error>;
