//! Album search and lookup against the catalog API
//!
//! Every call is built on the interceptor's HTTP client and sent through
//! [`AuthInterceptor::execute`], so authentication is never handled here.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::{Error, Result, transport};
use crate::interceptor::AuthInterceptor;

/// Default catalog API base URL.
pub const DEFAULT_API_BASE: &str = "https://api.spotify.com/v1";

/// Albums per search page unless the caller asks otherwise.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Largest page the search endpoint serves.
pub const MAX_PAGE_SIZE: u32 = 50;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Artist {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Image {
    pub url: String,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub width: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Album {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub artists: Vec<Artist>,
    #[serde(default)]
    pub images: Vec<Image>,
    #[serde(default)]
    pub release_date: String,
    #[serde(default)]
    pub total_tracks: u32,
}

impl Album {
    /// Artist names joined for display.
    pub fn artist_names(&self) -> String {
        join_artists(&self.artists)
    }
}

/// One page of album search results.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AlbumPage {
    pub items: Vec<Album>,
    pub total: u32,
    pub limit: u32,
    pub offset: u32,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub previous: Option<String>,
}

impl AlbumPage {
    pub fn empty(limit: u32) -> Self {
        Self {
            items: Vec::new(),
            total: 0,
            limit,
            offset: 0,
            next: None,
            previous: None,
        }
    }

    pub fn has_more(&self) -> bool {
        self.next.is_some()
    }

    /// Offset of the page after this one.
    pub fn next_offset(&self) -> u32 {
        self.offset + self.items.len() as u32
    }
}

#[derive(Debug, Deserialize)]
struct AlbumSearchResponse {
    albums: AlbumPage,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Track {
    pub id: String,
    pub name: String,
    pub duration_ms: u64,
    pub track_number: u32,
    #[serde(default)]
    pub artists: Vec<Artist>,
}

impl Track {
    /// `m:ss`
    pub fn duration_display(&self) -> String {
        let secs = self.duration_ms / 1000;
        format!("{}:{:02}", secs / 60, secs % 60)
    }

    pub fn artist_names(&self) -> String {
        join_artists(&self.artists)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TrackPage {
    pub items: Vec<Track>,
    pub total: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AlbumDetails {
    #[serde(flatten)]
    pub album: Album,
    pub tracks: TrackPage,
}

fn join_artists(artists: &[Artist]) -> String {
    artists
        .iter()
        .map(|a| a.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Catalog API client.
#[derive(Clone)]
pub struct CatalogClient {
    interceptor: AuthInterceptor,
    base_url: Url,
    timeout: Duration,
}

impl CatalogClient {
    pub fn new(interceptor: AuthInterceptor, base_url: Url) -> Self {
        Self {
            interceptor,
            base_url,
            timeout: Duration::from_secs(30),
        }
    }

    /// Per-request timeout for API calls.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn interceptor(&self) -> &AuthInterceptor {
        &self.interceptor
    }

    /// Search albums matching `query`.
    ///
    /// A blank query returns an empty page without calling the API. `limit`
    /// is clamped to `1..=MAX_PAGE_SIZE`.
    pub async fn search_albums(&self, query: &str, offset: u32, limit: u32) -> Result<AlbumPage> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let query = query.trim();
        if query.is_empty() {
            return Ok(AlbumPage::empty(limit));
        }

        let url = self.endpoint(&["search"])?;
        let limit_param = limit.to_string();
        let offset_param = offset.to_string();
        let request = self.interceptor.client().get(url).query(&[
            ("q", query),
            ("type", "album"),
            ("limit", limit_param.as_str()),
            ("offset", offset_param.as_str()),
        ]);

        let response: AlbumSearchResponse = self.get_json(request).await?;
        debug!(
            returned = response.albums.items.len(),
            total = response.albums.total,
            "album search complete"
        );
        Ok(response.albums)
    }

    /// Fetch one album with its track listing.
    pub async fn album(&self, id: &str) -> Result<AlbumDetails> {
        let url = self.endpoint(&["albums", id])?;
        self.get_json(self.interceptor.client().get(url)).await
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| Error::InvalidUrl(format!("{} cannot be a base URL", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        let request = request.timeout(self.timeout).build().map_err(transport)?;
        let response = self.interceptor.execute(request).await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            return Err(Error::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await.map_err(transport)?;
        serde_json::from_slice(&bytes).map_err(|e| Error::Decode(e.to_string()))
    }
}
