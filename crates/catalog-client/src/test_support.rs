//! Mock provider (token endpoint and catalog API) shared by the unit tests

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json};
use catalog_auth::{
    AuthSession, Credential, CredentialStore, MemoryStorage, OAuthConfig, RecordingNavigator,
};
use serde_json::json;
use tokio::net::TcpListener;
use url::Url;

pub(crate) struct MockOptions {
    /// Status the token endpoint answers refresh grants with
    pub refresh_status: StatusCode,
    /// Whether the API accepts tokens the mock issues
    pub accept_issued: bool,
    pub token_delay: Duration,
}

impl Default for MockOptions {
    fn default() -> Self {
        Self {
            refresh_status: StatusCode::OK,
            accept_issued: true,
            token_delay: Duration::ZERO,
        }
    }
}

#[derive(Default)]
struct MockState {
    token_calls: AtomicUsize,
    api_calls: AtomicUsize,
    accepted: Mutex<HashSet<String>>,
    bearers: Mutex<Vec<String>>,
    refresh_tokens: Mutex<Vec<String>>,
}

pub(crate) struct MockProvider {
    pub oauth: OAuthConfig,
    pub api_base: Url,
    state: Arc<MockState>,
}

impl MockProvider {
    /// Serve `/api/token` and `/v1/...` on 127.0.0.1.
    ///
    /// Refresh grants issue `AT2`, `AT3`, ... in call order and keep the
    /// refresh token. The API answers 401 for any bearer it hasn't accepted.
    /// Album ids `missing`, `broken` and `stalled` answer 404, 500, or
    /// nothing for five seconds.
    pub async fn start(options: MockOptions) -> Self {
        let state = Arc::new(MockState::default());
        let options = Arc::new(options);

        let token_state = state.clone();
        let token_options = options.clone();
        let app = axum::Router::new()
            .route(
                "/api/token",
                post(move |Form(form): Form<HashMap<String, String>>| {
                    let state = token_state.clone();
                    let options = token_options.clone();
                    async move { issue_token(&state, &options, form).await }
                }),
            )
            .route("/v1/search", get(search))
            .route("/v1/albums/{id}", get(album))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let base = format!("http://{addr}");
        let oauth = OAuthConfig::new(
            "client-abc",
            Url::parse("http://127.0.0.1:8888/callback").unwrap(),
        )
        .with_endpoints(
            Url::parse(&format!("{base}/authorize")).unwrap(),
            Url::parse(&format!("{base}/api/token")).unwrap(),
        );

        Self {
            oauth,
            api_base: Url::parse(&format!("{base}/v1")).unwrap(),
            state,
        }
    }

    /// Make the API accept `token` as a bearer.
    pub fn accept(&self, token: &str) {
        self.state.accepted.lock().unwrap().insert(token.to_string());
    }

    pub fn token_calls(&self) -> usize {
        self.state.token_calls.load(Ordering::SeqCst)
    }

    pub fn api_calls(&self) -> usize {
        self.state.api_calls.load(Ordering::SeqCst)
    }

    /// Authorization header of every API call, empty when absent.
    pub fn bearers(&self) -> Vec<String> {
        self.state.bearers.lock().unwrap().clone()
    }

    pub fn refresh_tokens_seen(&self) -> Vec<String> {
        self.state.refresh_tokens.lock().unwrap().clone()
    }
}

/// Session over in-memory storage holding `AT1`/`RT1` expiring at
/// `expires_at`, or nothing.
pub(crate) fn seeded_session(provider: &MockProvider, expires_at: Option<u64>) -> AuthSession {
    let store = CredentialStore::new(MemoryStorage::new());
    if let Some(expires_at) = expires_at {
        store.save(&Credential {
            access_token: "AT1".into(),
            refresh_token: "RT1".into(),
            expires_at,
            token_type: "Bearer".into(),
        });
    }
    AuthSession::new(
        provider.oauth.clone(),
        store,
        Arc::new(RecordingNavigator::new()),
    )
    .unwrap()
}

async fn issue_token(
    state: &MockState,
    options: &MockOptions,
    form: HashMap<String, String>,
) -> Response {
    let index = state.token_calls.fetch_add(1, Ordering::SeqCst);
    if let Some(refresh) = form.get("refresh_token") {
        state.refresh_tokens.lock().unwrap().push(refresh.clone());
    }
    tokio::time::sleep(options.token_delay).await;

    if options.refresh_status != StatusCode::OK {
        let body = json!({"error": "invalid_grant", "error_description": "Refresh token revoked"});
        return (options.refresh_status, Json(body)).into_response();
    }

    let access = format!("AT{}", index + 2);
    if options.accept_issued {
        state.accepted.lock().unwrap().insert(access.clone());
    }
    let body = json!({
        "access_token": access,
        "expires_in": 3600,
        "token_type": "Bearer",
    });
    (StatusCode::OK, Json(body)).into_response()
}

/// Record the call and check its bearer; `Err` is the 401 to return.
fn authenticate(state: &MockState, headers: &HeaderMap) -> Result<(), Response> {
    state.api_calls.fetch_add(1, Ordering::SeqCst);
    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    state.bearers.lock().unwrap().push(bearer.clone());

    let token = bearer.strip_prefix("Bearer ").unwrap_or("");
    if state.accepted.lock().unwrap().contains(token) {
        Ok(())
    } else {
        let body = json!({"error": {"status": 401, "message": "The access token expired"}});
        Err((StatusCode::UNAUTHORIZED, Json(body)).into_response())
    }
}

async fn search(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if let Err(rejection) = authenticate(&state, &headers) {
        return rejection;
    }

    let query = params.get("q").cloned().unwrap_or_default();
    let limit: u32 = params.get("limit").and_then(|l| l.parse().ok()).unwrap_or(20);
    let offset: u32 = params.get("offset").and_then(|o| o.parse().ok()).unwrap_or(0);
    let total = 3u32;

    let items: Vec<_> = (offset..total.min(offset + limit))
        .map(|i| {
            json!({
                "id": format!("album-{i}"),
                "name": format!("{query} vol. {}", i + 1),
                "artists": [{"name": "Miles Davis"}],
                "images": [{"url": "https://img.example/1.jpg", "height": 640, "width": 640}],
                "release_date": "1959-08-17",
                "total_tracks": 5,
                "album_type": params.get("type").cloned().unwrap_or_default(),
            })
        })
        .collect();
    let next = (offset + limit < total).then(|| format!("next?offset={}", offset + limit));

    Json(json!({
        "albums": {
            "items": items,
            "total": total,
            "limit": limit,
            "offset": offset,
            "next": next,
            "previous": null,
        }
    }))
    .into_response()
}

async fn album(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(rejection) = authenticate(&state, &headers) {
        return rejection;
    }
    if id == "missing" {
        let body = json!({"error": {"status": 404, "message": "Non existing id"}});
        return (StatusCode::NOT_FOUND, Json(body)).into_response();
    }
    if id == "broken" {
        let body = json!({"error": {"status": 500, "message": "Server error"}});
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response();
    }
    if id == "stalled" {
        tokio::time::sleep(Duration::from_secs(5)).await;
    }

    Json(json!({
        "id": id,
        "name": "Kind of Blue",
        "artists": [{"name": "Miles Davis"}],
        "images": [],
        "release_date": "1959-08-17",
        "total_tracks": 2,
        "tracks": {
            "items": [
                {"id": "t1", "name": "So What", "duration_ms": 562000, "track_number": 1,
                 "artists": [{"name": "Miles Davis"}]},
                {"id": "t2", "name": "Freddie Freeloader", "duration_ms": 589000, "track_number": 2,
                 "artists": [{"name": "Miles Davis"}]},
            ],
            "total": 2,
        }
    }))
    .into_response()
}
