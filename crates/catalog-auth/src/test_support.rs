//! Mock token endpoint shared by the unit tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Form;
use axum::http::StatusCode;
use axum::routing::post;
use tokio::net::TcpListener;
use url::Url;

use crate::config::OAuthConfig;

type Responder =
    Arc<dyn Fn(usize, &HashMap<String, String>) -> (StatusCode, serde_json::Value) + Send + Sync>;

/// A token endpoint on 127.0.0.1 that records every form it receives.
pub(crate) struct MockTokenEndpoint {
    pub config: OAuthConfig,
    pub calls: Arc<AtomicUsize>,
    pub forms: Arc<Mutex<Vec<HashMap<String, String>>>>,
}

impl MockTokenEndpoint {
    /// Start the endpoint. `respond` receives the zero-based call index and
    /// the submitted form; each answer is delayed by `delay`.
    pub async fn start(
        delay: Duration,
        respond: impl Fn(usize, &HashMap<String, String>) -> (StatusCode, serde_json::Value)
        + Send
        + Sync
        + 'static,
    ) -> Self {
        let calls = Arc::new(AtomicUsize::new(0));
        let forms = Arc::new(Mutex::new(Vec::new()));
        let respond: Responder = Arc::new(respond);

        let handler_calls = calls.clone();
        let handler_forms = forms.clone();
        let app = axum::Router::new().route(
            "/api/token",
            post(move |Form(form): Form<HashMap<String, String>>| {
                let calls = handler_calls.clone();
                let forms = handler_forms.clone();
                let respond = respond.clone();
                async move {
                    let index = calls.fetch_add(1, Ordering::SeqCst);
                    let (status, body) = respond(index, &form);
                    forms.lock().unwrap().push(form);
                    tokio::time::sleep(delay).await;
                    (status, axum::Json(body))
                }
            }),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let base = format!("http://{addr}");
        let config = OAuthConfig::new(
            "client-abc",
            Url::parse("http://127.0.0.1:8888/callback").unwrap(),
        )
        .with_endpoints(
            Url::parse(&format!("{base}/authorize")).unwrap(),
            Url::parse(&format!("{base}/api/token")).unwrap(),
        );

        Self {
            config,
            calls,
            forms,
        }
    }

    /// Endpoint that always answers with the same status and body.
    pub async fn fixed(status: StatusCode, body: serde_json::Value, delay: Duration) -> Self {
        Self::start(delay, move |_, _| (status, body.clone())).await
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn form(&self, index: usize) -> HashMap<String, String> {
        self.forms.lock().unwrap()[index].clone()
    }
}

pub(crate) fn tokens(access: &str, refresh: Option<&str>, expires_in: u64) -> serde_json::Value {
    let mut body = serde_json::json!({
        "access_token": access,
        "expires_in": expires_in,
        "token_type": "Bearer",
    });
    if let Some(refresh) = refresh {
        body["refresh_token"] = serde_json::Value::String(refresh.to_string());
    }
    body
}
