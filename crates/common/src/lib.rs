//! Common types shared by the album search crates

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
