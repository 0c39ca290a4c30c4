//! Demonstration HTTP/WebSocket surface fronting the [`Orchestrator`].
//!
//! HTTP request routing and body parsing live outside the runtime library
//! itself, specified only at their interface with the core; this binary is
//! the thin embedder the core assumes exists, built on the familiar
//! `axum::Router` plus graceful-`ctrl_c`-shutdown pattern.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::signal;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use browser_session_runtime::config::{RuntimeConfig, SessionConfig};
use browser_session_runtime::driver::chromium::ChromiumLauncher;
use browser_session_runtime::error::RuntimeError;
use browser_session_runtime::orchestrator::{BrowserState, Orchestrator};

struct AppState {
    orchestrator: Arc<Orchestrator>,
    current_session: Mutex<Option<SessionRecord>>,
    next_id: AtomicU64,
}

#[derive(Clone)]
struct SessionRecord {
    id: String,
    started_at: DateTime<Utc>,
}

struct ApiError(RuntimeError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            RuntimeError::InvalidState(_) => StatusCode::CONFLICT,
            RuntimeError::Launch(_) => StatusCode::BAD_GATEWAY,
            RuntimeError::Drain(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RuntimeError::Crash(_) => StatusCode::SERVICE_UNAVAILABLE,
            RuntimeError::Context(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RuntimeError::HookFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            RuntimeError::Reentrant => StatusCode::CONFLICT,
        };
        (status, self.0.to_string()).into_response()
    }
}

impl From<RuntimeError> for ApiError {
    fn from(e: RuntimeError) -> Self {
        Self(e)
    }
}

#[derive(Serialize)]
struct SessionView {
    id: String,
    state: &'static str,
    started_at: DateTime<Utc>,
}

fn state_label(state: BrowserState) -> &'static str {
    match state {
        BrowserState::Idle => "idle",
        BrowserState::Launching => "launching",
        BrowserState::Live => "live",
        BrowserState::Draining => "draining",
        BrowserState::Closed => "closed",
        BrowserState::Error => "error",
    }
}

async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(config): Json<Option<SessionConfig>>,
) -> Result<Json<SessionView>, ApiError> {
    state.orchestrator.start_new_session(config.unwrap_or_default()).await?;
    let id = format!("session-{}", state.next_id.fetch_add(1, Ordering::SeqCst));
    let record = SessionRecord {
        id: id.clone(),
        started_at: Utc::now(),
    };
    *state.current_session.lock().await = Some(record.clone());
    let browser_state = state.orchestrator.get_session_state().await;
    Ok(Json(SessionView {
        id: record.id,
        state: state_label(browser_state),
        started_at: record.started_at,
    }))
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, ApiError> {
    let record = state
        .current_session
        .lock()
        .await
        .clone()
        .filter(|r| r.id == id)
        .ok_or_else(|| ApiError(RuntimeError::InvalidState(format!("no such session: {id}"))))?;
    let browser_state = state.orchestrator.get_session_state().await;
    Ok(Json(SessionView {
        id: record.id,
        state: state_label(browser_state),
        started_at: record.started_at,
    }))
}

async fn release_session(State(state): State<Arc<AppState>>) -> Result<StatusCode, ApiError> {
    state.orchestrator.end_session().await?;
    *state.current_session.lock().await = None;
    Ok(StatusCode::NO_CONTENT)
}

async fn release_session_by_id(
    State(state): State<Arc<AppState>>,
    Path(_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    release_session(State(state)).await
}

async fn get_session_context(
    State(state): State<Arc<AppState>>,
    Path(_id): Path<String>,
) -> Result<Json<browser_session_runtime::config::SessionContext>, ApiError> {
    Ok(Json(state.orchestrator.get_browser_state().await?))
}

async fn control_protocol_ws(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| async move {
        if let Err(e) = state.orchestrator.proxy_websocket(socket).await {
            tracing::warn!("websocket upgrade rejected: {e}");
        }
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let runtime = RuntimeConfig::load()?;
    let host = runtime.host.clone().unwrap_or_else(|| "127.0.0.1".to_string());
    let port = runtime.port.unwrap_or(8787);
    let launcher = Arc::new(ChromiumLauncher::new(runtime.clone()));
    let orchestrator = Orchestrator::new(runtime, launcher, Vec::new());

    let app_state = Arc::new(AppState {
        orchestrator,
        current_session: Mutex::new(None),
        next_id: AtomicU64::new(0),
    });

    let router = Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/release", post(release_session))
        .route("/sessions/{id}", get(get_session))
        .route("/sessions/{id}/release", post(release_session_by_id))
        .route("/sessions/{id}/context", get(get_session_context))
        .route("/", get(control_protocol_ws))
        .layer(CorsLayer::permissive())
        .with_state(app_state.clone());

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("browser session runtime listening on {addr}");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = signal::ctrl_c().await;
            info!("shutdown signal received, ending any live session");
            if let Err(e) = app_state.orchestrator.shutdown().await {
                tracing::warn!("shutdown: orchestrator reported an error: {e}");
            }
        })
        .await?;

    Ok(())
}
