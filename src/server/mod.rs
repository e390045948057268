//! HTTP control surface for the light daemon.
//!
//! | Path | Description |
//! |------|-------------|
//! | `POST /play` | Play the encoded sequence in the body (`?queue=true` to queue) |
//! | `GET /play/:name` | Play the stored `<name>.bin` |
//! | `POST /stop` | Cancel pending starts and stop playback |
//! | `POST /upload` | Store the body under the `X-Filename` header |
//! | `GET /list` | Stored audio files |
//! | `GET /audio/:name` | Download a stored file |
//! | `GET /status` | Idle or playing, and whether a show is queued |

pub mod store;

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::config::ServerConfig;
use crate::playback::{ChannelOutput, PlayMode, PlaybackError, StartTicket, SyncStart};
use crate::sequence::{FrameSequence, SequenceError};
use store::{AudioStore, StoreError};

pub const FILENAME_HEADER: &str = "x-filename";

/// The handshake front of the scheduler driving the configured outputs.
pub type Lights = SyncStart<Box<dyn ChannelOutput>>;

#[derive(Clone)]
pub struct AppState {
    pub lights: Lights,
    pub store: Arc<AudioStore>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad sequence: {0}")]
    Sequence(#[from] SequenceError),
    #[error(transparent)]
    Playback(#[from] PlaybackError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("missing X-Filename header")]
    MissingFilename,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Sequence(_) | ApiError::MissingFilename => StatusCode::BAD_REQUEST,
            ApiError::Playback(PlaybackError::ChannelCountMismatch { .. }) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Playback(PlaybackError::Superseded) => StatusCode::CONFLICT,
            ApiError::Playback(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Store(StoreError::InvalidName(_)) => StatusCode::BAD_REQUEST,
            ApiError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Store(StoreError::Io(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("{}", self);
        } else {
            log::warn!("Rejected request: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
struct PlayQuery {
    #[serde(default)]
    queue: bool,
}

impl PlayQuery {
    fn mode(&self) -> PlayMode {
        if self.queue {
            PlayMode::Queue
        } else {
            PlayMode::Replace
        }
    }
}

pub fn router(state: AppState, cfg: &ServerConfig) -> Router {
    let mut app = Router::new()
        .route("/play", post(play_body))
        .route("/play/:filename", get(play_stored))
        .route("/stop", post(stop))
        .route("/upload", post(upload))
        .route("/list", get(list))
        .route("/status", get(status))
        .nest_service("/audio", ServeDir::new(state.store.root()));
    if let Some(dir) = &cfg.static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(DefaultBodyLimit::max(cfg.max_upload_bytes))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until Ctrl-C, then stop the lights.
pub async fn serve(lights: Lights, cfg: &ServerConfig) -> anyhow::Result<()> {
    let store = AudioStore::open(&cfg.audio_dir)
        .await
        .with_context(|| format!("Failed to open audio directory {}", cfg.audio_dir.display()))?;
    let state = AppState {
        lights: lights.clone(),
        store: Arc::new(store),
    };
    let app = router(state, cfg);

    let listener = tokio::net::TcpListener::bind(cfg.bind)
        .await
        .with_context(|| format!("Failed to bind {}", cfg.bind))?;
    log::info!("Listening on http://{}", cfg.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server terminated unexpectedly")?;

    lights.submit_stop().await;
    log::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => log::info!("Shutting down"),
        Err(err) => {
            log::error!("Cannot listen for Ctrl-C: {}", err);
            std::future::pending::<()>().await;
        }
    }
}

async fn start(
    state: &AppState,
    bytes: &[u8],
    mode: PlayMode,
) -> Result<Json<StartTicket>, ApiError> {
    let sequence = FrameSequence::decode(bytes, state.lights.scheduler().channels())?;
    log::info!(
        "Play request: {} frames at {} fps ({:?})",
        sequence.len(),
        sequence.fps(),
        mode
    );
    Ok(Json(state.lights.submit_play(sequence, mode).await?))
}

async fn play_body(
    State(state): State<AppState>,
    Query(query): Query<PlayQuery>,
    body: Bytes,
) -> Result<Json<StartTicket>, ApiError> {
    start(&state, &body, query.mode()).await
}

async fn play_stored(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    Query(query): Query<PlayQuery>,
) -> Result<Json<StartTicket>, ApiError> {
    let bytes = state.store.load_sequence_bytes(&filename).await?;
    start(&state, &bytes, query.mode()).await
}

async fn stop(State(state): State<AppState>) -> StatusCode {
    state.lights.submit_stop().await;
    StatusCode::OK
}

async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let name = headers
        .get(FILENAME_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::MissingFilename)?;
    state.store.save(name, &body).await?;
    Ok(Json(json!({ "success": true })))
}

async fn list(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let files = state.store.list().await?;
    Ok(Json(json!({ "files": files })))
}

async fn status(State(state): State<AppState>) -> Json<Value> {
    let scheduler = state.lights.scheduler();
    Json(json!({
        "state": scheduler.state(),
        "queued": scheduler.has_queued(),
    }))
}
