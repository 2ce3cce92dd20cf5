//! Fake audio host lifecycle management
//!
//! Spawns a small axum app on a random port that behaves like the hosts the
//! downloader deals with: CDN download endpoints, direct files, player pages
//! and token-gated download forms. Every request path is recorded.

use super::constants::*;
use super::fake_media::fake_source;
use axum::extract::{Path, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

#[derive(Clone, Default)]
struct HostState {
    paths: Arc<Mutex<Vec<String>>>,
}

/// Fake host instance.
///
/// When dropped, the server gracefully shuts down.
pub struct FakeHost {
    /// Base URL (e.g., "http://127.0.0.1:12345")
    pub base_url: String,
    paths: Arc<Mutex<Vec<String>>>,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

fn audio_response(body: Vec<u8>) -> Response {
    ([(header::CONTENT_TYPE, "audio/mpeg")], body).into_response()
}

async fn index() -> &'static str {
    "ok"
}

/// Record the path of every request except readiness checks on `/`.
async fn record_path(State(state): State<HostState>, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    if path != "/" {
        state.paths.lock().unwrap().push(path);
    }
    next.run(request).await
}

/// `/song/{id}/download`: the CDN endpoint. The id doubles as the content tag.
async fn cdn_download(Path(id): Path<String>) -> Response {
    if id == MISSING_ITEM_ID {
        return StatusCode::NOT_FOUND.into_response();
    }
    audio_response(fake_source(&id))
}

/// `/song/{id}`: the public song page, with a player for the same file.
async fn song_page(Path(id): Path<String>) -> Response {
    Html(format!(
        "<html><body><h1>{id}</h1><audio controls src=\"/files/{id}.mp3\"></audio></body></html>"
    ))
    .into_response()
}

/// `/files/{name}`: direct files, with a few misbehaving names.
async fn file(Path(name): Path<String>) -> Response {
    let stem = name.rsplit_once('.').map(|(s, _)| s).unwrap_or(&name);
    match stem {
        TINY_FILE => audio_response(b"ID3 not much here".to_vec()),
        HTML_FILE => Html("<!DOCTYPE html><html><body>Please log in</body></html>").into_response(),
        DISGUISED_FILE => audio_response(
            format!(
                "<!DOCTYPE html><html><body>{}</body></html>",
                "rate limited ".repeat(2048)
            )
            .into_bytes(),
        ),
        MISSING_ITEM_ID => StatusCode::NOT_FOUND.into_response(),
        _ => audio_response(fake_source(stem)),
    }
}

/// `/player/{id}`: a player page that embeds the file in an inline config.
async fn player_page(Path(id): Path<String>) -> Response {
    Html(format!(
        r#"<html><head><script>var player = {{"title": "{id}", "file": "\/files\/{id}.mp3"}};</script></head><body></body></html>"#
    ))
    .into_response()
}

/// `/gated/{id}`: a download page protected by a session cookie and CSRF token.
async fn gated_page(Path(id): Path<String>) -> Response {
    let body = format!(
        r#"<html><body>
<form method="post" action="/gated/{id}/unlock">
  <input type="hidden" name="csrf_token" value="{token}">
  <input type="hidden" name="item" value="{id}">
  <input type="submit" value="Download">
</form>
</body></html>"#,
        token = gated_token(&id)
    );
    (
        [(header::SET_COOKIE, format!("{}={}; Path=/", SESSION_COOKIE, id))],
        Html(body),
    )
        .into_response()
}

async fn gated_unlock(
    Path(id): Path<String>,
    headers: HeaderMap,
    Form(fields): Form<HashMap<String, String>>,
) -> Response {
    let expected_cookie = format!("{}={}", SESSION_COOKIE, id);
    let has_session = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').any(|c| c.trim() == expected_cookie))
        .unwrap_or(false);
    let token_ok = fields.get("csrf_token") == Some(&gated_token(&id));
    if !has_session || !token_ok {
        return StatusCode::FORBIDDEN.into_response();
    }
    Json(serde_json::json!({
        "status": "ok",
        "data": { "download_url": format!("/files/{}.mp3", id) }
    }))
    .into_response()
}

pub fn gated_token(id: &str) -> String {
    format!("tok-{}", id)
}

impl FakeHost {
    /// Spawns a fake host on a random port and waits until it answers.
    pub async fn spawn() -> Self {
        let state = HostState::default();
        let paths = state.paths.clone();

        let app = Router::new()
            .route("/", get(index))
            .route("/song/{id}", get(song_page))
            .route("/song/{id}/download", get(cdn_download))
            .route("/files/{name}", get(file))
            .route("/player/{id}", get(player_page))
            .route("/gated/{id}", get(gated_page))
            .route("/gated/{id}/unlock", post(gated_unlock))
            .layer(middleware::from_fn_with_state(state.clone(), record_path))
            .with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();
        let base_url = format!("http://127.0.0.1:{}", port);

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Fake host failed");
        });

        let host = Self {
            base_url,
            paths,
            _shutdown_tx: Some(shutdown_tx),
        };
        host.wait_for_ready().await;
        host
    }

    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        loop {
            if start.elapsed() > Duration::from_millis(SERVER_READY_TIMEOUT_MS) {
                panic!(
                    "Fake host did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }
            match client.get(format!("{}/", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => return,
                _ => tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await,
            }
        }
    }

    /// Requests served so far, not counting readiness probes.
    pub fn requests(&self) -> usize {
        self.paths.lock().unwrap().len()
    }

    /// Paths requested so far, in order.
    pub fn requested_paths(&self) -> Vec<String> {
        self.paths.lock().unwrap().clone()
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Host name and port as they appear in links, e.g. "127.0.0.1:12345".
    pub fn authority(&self) -> &str {
        self.base_url.trim_start_matches("http://")
    }
}

impl Drop for FakeHost {
    fn drop(&mut self) {
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
