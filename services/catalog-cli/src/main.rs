//! album-search
//!
//! Terminal client for the music catalog:
//! 1. `login` runs the PKCE authorization flow through a loopback listener
//! 2. The session is kept in a local file between invocations
//! 3. `search` and `album` call the catalog API with the session's token,
//!    refreshing it transparently

mod callback_server;
mod config;
mod error;
mod navigator;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use catalog_auth::{
    AuthSession, AuthState, CallbackOutcome, CallbackParams, CredentialStore, FileStorage,
    MemoryStorage, now_millis,
};
use catalog_client::{AuthInterceptor, CatalogClient, DEFAULT_PAGE_SIZE};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

use crate::callback_server::CallbackServer;
use crate::config::Config;
use crate::navigator::TerminalNavigator;

#[derive(Parser)]
#[command(name = "album-search")]
#[command(about = "Search the music catalog from the terminal")]
#[command(version)]
struct Args {
    /// Config file (defaults to CONFIG_PATH, then ./album-search.toml)
    #[arg(long, global = true)]
    config: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Authorize with the catalog provider
    Login {
        /// Print the authorization URL and exit; finish with `callback`
        #[arg(long)]
        no_wait: bool,
        /// How long to wait for the browser redirect
        #[arg(long, default_value_t = 300)]
        timeout_secs: u64,
    },
    /// Finish a login from the URL the browser was redirected to
    Callback { redirect_url: String },
    /// Show the session state
    Status,
    /// Forget the stored session
    Logout,
    /// Search albums
    Search {
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
        #[arg(long, default_value_t = 0)]
        offset: u32,
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        limit: u32,
    },
    /// Show an album and its tracks
    Album { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs on stderr; stdout carries command output
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    let args = Args::parse();

    let config_path = Config::resolve_path(args.config.as_deref());
    info!(path = %config_path.display(), "loading configuration");
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    let session = build_session(&config)?;
    let http = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;
    let interceptor = AuthInterceptor::new(session.clone(), http, &config.api.base_url);
    let client = CatalogClient::new(interceptor, config.api.base_url.clone())
        .with_timeout(config.api.timeout());

    match args.command {
        Command::Login {
            no_wait,
            timeout_secs,
        } => login(&session, no_wait, Duration::from_secs(timeout_secs)).await,
        Command::Callback { redirect_url } => {
            let url = Url::parse(&redirect_url).context("redirect URL is not a valid URL")?;
            finish_login(&session, CallbackParams::from_url(&url)).await
        }
        Command::Status => {
            print_status(&session);
            Ok(())
        }
        Command::Logout => {
            session.logout();
            println!("Logged out.");
            Ok(())
        }
        Command::Search {
            query,
            offset,
            limit,
        } => search(&client, &query.join(" "), offset, limit).await,
        Command::Album { id } => album(&client, &id).await,
    }
}

/// Open the session over the configured file, falling back to memory when
/// the file can't be used.
fn build_session(config: &Config) -> Result<AuthSession> {
    let store = match FileStorage::open(config.storage.session_file.clone()) {
        Ok(storage) => CredentialStore::new(storage),
        Err(e) => {
            warn!(error = %e, "session file unusable, session will not persist");
            CredentialStore::new(MemoryStorage::new())
        }
    };
    AuthSession::new(config.oauth.clone(), store, Arc::new(TerminalNavigator))
        .context("invalid OAuth configuration")
}

async fn login(session: &AuthSession, no_wait: bool, timeout: Duration) -> Result<()> {
    if no_wait {
        session.login();
        eprintln!("When the browser lands on the redirect URI, run:\n\n  album-search callback '<redirect URL>'\n");
        return Ok(());
    }

    let server = CallbackServer::bind(&session.config().redirect_uri).await?;
    session.login();
    match server.local_addr() {
        Some(addr) => eprintln!("Waiting for the authorization redirect on {addr}..."),
        None => eprintln!("Waiting for the authorization redirect..."),
    }

    let params = match server.wait(timeout).await {
        Ok(params) => params,
        Err(e) => {
            session.cancel_authorization();
            return Err(e.into());
        }
    };
    finish_login(session, params).await
}

async fn finish_login(session: &AuthSession, params: CallbackParams) -> Result<()> {
    match session.complete_redirect(params).await {
        CallbackOutcome::LoggedIn => {
            println!("Logged in.");
            Ok(())
        }
        CallbackOutcome::Unauthenticated { reason } => {
            Err(error::Error::Unauthenticated(reason).into())
        }
    }
}

fn print_status(session: &AuthSession) {
    let state = session.state();
    println!("state: {}", state.label());
    if let Some(credential) = session.credential() {
        let now = now_millis();
        if credential.is_valid_at(now) {
            let minutes = (credential.expires_at - now) / 60_000;
            println!("access token: valid for {minutes} more minute(s)");
        } else {
            println!("access token: expired, will refresh on next request");
        }
    } else if state == AuthState::LoggedOut {
        println!("run `album-search login` to authorize");
    }
}

async fn search(client: &CatalogClient, query: &str, offset: u32, limit: u32) -> Result<()> {
    let page = client
        .search_albums(query, offset, limit)
        .await
        .map_err(api_error)?;

    if page.items.is_empty() {
        println!("No albums found.");
        return Ok(());
    }
    for album in &page.items {
        println!(
            "{}  {} - {} ({}, {} tracks)",
            album.id,
            album.name,
            album.artist_names(),
            album.release_date,
            album.total_tracks
        );
    }
    let shown_to = page.offset as usize + page.items.len();
    println!("{}-{} of {}", page.offset + 1, shown_to, page.total);
    if page.has_more() {
        println!("more: --offset {}", page.next_offset());
    }
    Ok(())
}

async fn album(client: &CatalogClient, id: &str) -> Result<()> {
    let details = client.album(id).await.map_err(api_error)?;

    println!("{} - {}", details.album.name, details.album.artist_names());
    println!(
        "released {}, {} tracks",
        details.album.release_date, details.album.total_tracks
    );
    for track in &details.tracks.items {
        println!(
            "{:>3}. {} ({})",
            track.track_number,
            track.name,
            track.duration_display()
        );
    }
    Ok(())
}

/// Lead with the user-facing message, keep the detail as the cause.
fn api_error(e: catalog_client::Error) -> anyhow::Error {
    let message = e.user_message();
    anyhow::Error::new(e).context(message)
}
