//! Catalog API client
//!
//! `AuthInterceptor` attaches the session's bearer token to requests for the
//! protected API origin, refreshing before send or after a 401.
//! `CatalogClient` is the album search and lookup surface built on top of it.

pub mod catalog;
pub mod error;
pub mod interceptor;
pub mod metrics;

#[cfg(test)]
mod test_support;

pub use catalog::{
    Album, AlbumDetails, AlbumPage, Artist, CatalogClient, DEFAULT_API_BASE, DEFAULT_PAGE_SIZE,
    Image, MAX_PAGE_SIZE, Track, TrackPage,
};
pub use error::{Error, Result};
pub use interceptor::AuthInterceptor;
