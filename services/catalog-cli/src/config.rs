//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The client ID may come from `CATALOG_CLIENT_ID` so a shared config file
//! can be checked in without it. When an application origin is set
//! (`[app] origin` or `CATALOG_APP_ORIGIN`), the redirect URI is derived from
//! it and replaces `oauth.redirect_uri`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use catalog_auth::{OAuthConfig, redirect_uri_for_origin};
use catalog_client::DEFAULT_API_BASE;
use serde::Deserialize;
use url::Url;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Where the application is served from
#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
    pub origin: Option<Url>,
}

/// Catalog API settings
#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: Url,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout(),
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Where the session survives between invocations
#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_session_file")]
    pub session_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            session_file: default_session_file(),
        }
    }
}

fn default_base_url() -> Url {
    Url::parse(DEFAULT_API_BASE).expect("default API base is a valid URL")
}

fn default_timeout() -> u64 {
    30
}

fn default_session_file() -> PathBuf {
    PathBuf::from("album-search-session.json")
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(client_id) = std::env::var("CATALOG_CLIENT_ID") {
            let client_id = client_id.trim().to_owned();
            if !client_id.is_empty() {
                config.oauth.client_id = client_id;
            }
        }

        if let Ok(origin) = std::env::var("CATALOG_APP_ORIGIN") {
            config.app.origin = Some(Url::parse(origin.trim())?);
        }
        if let Some(origin) = &config.app.origin {
            config.oauth.redirect_uri = redirect_uri_for_origin(origin)
                .map_err(|e| common::Error::Config(e.to_string()))?;
        }

        config
            .oauth
            .validate()
            .map_err(|e| common::Error::Config(e.to_string()))?;

        if !matches!(config.api.base_url.scheme(), "http" | "https") {
            return Err(common::Error::Config(format!(
                "api.base_url must use http or https, got: {}",
                config.api.base_url
            )));
        }

        if config.api.timeout_secs == 0 {
            return Err(common::Error::Config(
                "api.timeout_secs must be greater than 0".into(),
            ));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("album-search.toml")
    }
}
