//! Loopback listener for the authorization redirect
//!
//! Binds the redirect URI's host and port before the browser is sent to the
//! provider, serves the callback path until the first hit, then shuts down.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::Router;
use axum::extract::{RawQuery, State};
use axum::response::Html;
use axum::routing::get;
use catalog_auth::CallbackParams;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Error, Result};

const RECEIVED_PAGE: &str = "<!doctype html><title>album-search</title>\
    <p>Authorization received. You can close this window and return to the terminal.</p>";

const FAILED_PAGE: &str = "<!doctype html><title>album-search</title>\
    <p>Authorization was not completed. Check the terminal for details.</p>";

type ParamsSlot = Arc<Mutex<Option<oneshot::Sender<CallbackParams>>>>;

pub struct CallbackServer {
    listener: TcpListener,
    path: String,
}

impl CallbackServer {
    /// Bind the listener named by `redirect_uri`, which must be a loopback
    /// http URI.
    pub async fn bind(redirect_uri: &Url) -> Result<Self> {
        if redirect_uri.scheme() != "http" {
            return Err(Error::CallbackServer(format!(
                "redirect URI must use http for a local listener, got: {redirect_uri}"
            )));
        }
        let host = match redirect_uri.host_str() {
            Some(host @ ("127.0.0.1" | "localhost" | "[::1]")) => host,
            _ => {
                return Err(Error::CallbackServer(format!(
                    "redirect URI host is not a loopback address: {redirect_uri}"
                )));
            }
        };
        let port = redirect_uri.port_or_known_default().unwrap_or(80);

        let listener = TcpListener::bind(format!("{host}:{port}"))
            .await
            .map_err(|e| Error::CallbackServer(format!("binding {host}:{port}: {e}")))?;
        if let Ok(addr) = listener.local_addr() {
            info!(addr = %addr, path = redirect_uri.path(), "callback listener bound");
        }

        Ok(Self {
            listener,
            path: redirect_uri.path().to_string(),
        })
    }

    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.listener.local_addr().ok()
    }

    /// Serve until the callback arrives or `timeout` elapses.
    pub async fn wait(self, timeout: Duration) -> Result<CallbackParams> {
        let (params_tx, params_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let slot: ParamsSlot = Arc::new(Mutex::new(Some(params_tx)));

        let app = Router::new()
            .route(&self.path, get(receive))
            .with_state(slot);
        let listener = self.listener;
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        let received = tokio::time::timeout(timeout, params_rx).await;
        let _ = shutdown_tx.send(());
        match server.await {
            Ok(Ok(())) => debug!("callback listener stopped"),
            Ok(Err(e)) => warn!(error = %e, "callback listener exited with error"),
            Err(e) => warn!(error = %e, "callback listener task failed"),
        }

        match received {
            Ok(Ok(params)) => Ok(params),
            Ok(Err(_)) => Err(Error::CallbackServer(
                "listener stopped before the callback arrived".into(),
            )),
            Err(_) => Err(Error::CallbackTimeout(timeout.as_secs())),
        }
    }
}

async fn receive(State(slot): State<ParamsSlot>, RawQuery(query): RawQuery) -> Html<&'static str> {
    let params = CallbackParams::from_query(query.as_deref().unwrap_or(""));
    let page = match params {
        CallbackParams::Code(_) => RECEIVED_PAGE,
        _ => FAILED_PAGE,
    };

    let sender = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
    match sender {
        Some(tx) => {
            let _ = tx.send(params);
        }
        None => debug!("ignoring repeated callback"),
    }
    Html(page)
}
