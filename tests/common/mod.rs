#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{Path as UrlPath, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::collections::{HashSet, VecDeque};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tiny_squeeze::client::{cancellable, Compressed, Shrinker};
use tiny_squeeze::{CompressionError, Result};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct MockState {
    addr: Mutex<Option<SocketAddr>>,
    shrink_script: Mutex<VecDeque<u16>>,
    download_script: Mutex<VecDeque<u16>>,
    shrink_hits: AtomicUsize,
    download_hits: AtomicUsize,
    outputs: Mutex<Vec<Vec<u8>>>,
    last_auth: Mutex<Option<String>>,
}

/// In-process stand-in for the shrink API.
///
/// `POST /shrink` answers with the next scripted status (201 once the script
/// runs out) and serves the first half of the upload at `/output/<n>`.
pub struct MockApi {
    pub addr: SocketAddr,
    state: Arc<MockState>,
}

impl MockApi {
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());
        let app = Router::new()
            .route("/shrink", post(shrink))
            .route("/output/:id", get(output))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        *state.addr.lock().unwrap() = Some(addr);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn endpoint(&self) -> String {
        format!("http://{}/shrink", self.addr)
    }

    pub fn script_shrink(&self, statuses: &[u16]) {
        self.state.shrink_script.lock().unwrap().extend(statuses);
    }

    pub fn script_download(&self, statuses: &[u16]) {
        self.state.download_script.lock().unwrap().extend(statuses);
    }

    pub fn shrink_hits(&self) -> usize {
        self.state.shrink_hits.load(Ordering::SeqCst)
    }

    pub fn download_hits(&self) -> usize {
        self.state.download_hits.load(Ordering::SeqCst)
    }

    pub fn last_auth(&self) -> Option<String> {
        self.state.last_auth.lock().unwrap().clone()
    }
}

fn error_body(status: u16) -> serde_json::Value {
    let (error, message) = match status {
        401 => ("Unauthorized", "Credentials are invalid"),
        429 => ("TooManyRequests", "Your monthly limit has been exceeded"),
        400..=499 => ("BadSignature", "Does not appear to be a PNG or JPEG file"),
        _ => ("InternalServerError", "Oops!"),
    };
    json!({ "error": error, "message": message })
}

async fn shrink(State(state): State<Arc<MockState>>, headers: HeaderMap, body: Bytes) -> Response {
    state.shrink_hits.fetch_add(1, Ordering::SeqCst);
    *state.last_auth.lock().unwrap() = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let status = state.shrink_script.lock().unwrap().pop_front().unwrap_or(201);
    if status != 201 {
        let code = StatusCode::from_u16(status).unwrap();
        return (code, Json(error_body(status))).into_response();
    }

    let compressed = body[..body.len() / 2].to_vec();
    let size = compressed.len();
    let id = {
        let mut outputs = state.outputs.lock().unwrap();
        outputs.push(compressed);
        outputs.len() - 1
    };
    let addr = state.addr.lock().unwrap().unwrap();
    let url = format!("http://{}/output/{}", addr, id);

    (
        StatusCode::CREATED,
        [(header::LOCATION, url.clone())],
        Json(json!({
            "input": { "size": body.len(), "type": "image/png" },
            "output": {
                "size": size,
                "type": "image/png",
                "width": 1,
                "height": 1,
                "ratio": 0.5,
                "url": url,
            }
        })),
    )
        .into_response()
}

async fn output(State(state): State<Arc<MockState>>, UrlPath(id): UrlPath<usize>) -> Response {
    state.download_hits.fetch_add(1, Ordering::SeqCst);

    let status = state.download_script.lock().unwrap().pop_front().unwrap_or(200);
    if status != 200 {
        return StatusCode::from_u16(status).unwrap().into_response();
    }
    match state.outputs.lock().unwrap().get(id) {
        Some(data) => data.clone().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Address that refuses connections.
pub async fn closed_endpoint() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}/shrink", addr)
}

/// Shrinker that halves its input after an optional delay and fails for
/// chosen file names.
#[derive(Default)]
pub struct FakeShrinker {
    pub delay: Duration,
    pub fail_names: HashSet<String>,
    pub calls: AtomicUsize,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
}

impl FakeShrinker {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn failing(names: &[&str]) -> Self {
        Self {
            fail_names: names.iter().map(|n| n.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Shrinker for FakeShrinker {
    async fn compress(
        &self,
        cancel: &CancellationToken,
        input: &mut (dyn AsyncRead + Send + Unpin),
        display_name: &str,
    ) -> Result<Compressed> {
        let mut data = Vec::new();
        input.read_to_end(&mut data).await?;
        self.calls.fetch_add(1, Ordering::SeqCst);

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        let slept = cancellable(cancel, tokio::time::sleep(self.delay)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        slept?;

        if self.fail_names.contains(display_name) {
            return Err(CompressionError::Api {
                status: 400,
                code: "BadSignature".to_string(),
                message: "Does not appear to be a PNG or JPEG file".to_string(),
            });
        }

        let original_size = data.len() as u64;
        data.truncate(data.len() / 2);
        Ok(Compressed {
            compressed_size: data.len() as u64,
            original_size,
            body: Box::pin(std::io::Cursor::new(data)),
        })
    }
}

pub fn write_file(dir: &Path, name: &str, len: usize) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    std::fs::write(&path, data).unwrap();
    path
}

pub fn create_temp_directory() -> TempDir {
    TempDir::new().unwrap()
}

/// Files in `dir`, excluding directories.
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
