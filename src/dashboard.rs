//! HTTP dashboard: engine state, live updates, admin corrections.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::info;

use crate::log_history::LogHistory;
use crate::orchestrator::{Engine, RemoveError};

#[derive(Clone)]
pub struct AppState {
    engine: Arc<Engine>,
    logs: LogHistory,
    settings: Arc<Map<String, Value>>,
}

pub fn build_app(engine: Arc<Engine>, logs: LogHistory, settings: Map<String, Value>) -> Router {
    let state = AppState { engine, logs, settings: Arc::new(settings) };
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/state-stream", get(state_stream))
        .route("/api/otps/{tracking}", put(put_otp))
        .route("/api/deliveries/{tracking}", delete(delete_delivery))
        .route("/api/logs", get(get_logs))
        .route("/api/settings", get(get_settings))
        .with_state(state)
}

pub async fn serve(addr: &str, app: Router) -> Result<(), String> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| format!("invalid DASHBOARD_ADDR: {e}"))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("bind failed: {e}"))?;
    info!("📊 Dashboard listening on {addr}");
    axum::serve(listener, app)
        .await
        .map_err(|e| format!("serve failed: {e}"))
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn snapshot(engine: &Engine) -> Value {
    json!({
        "ready": engine.is_ready(),
        "otps": engine.otps().all_otps(),
        "deliveries": engine.deliveries().list(),
        "trackingMap": engine.otps().tracking_map(),
    })
}

async fn get_state(State(state): State<AppState>) -> Json<Value> {
    Json(snapshot(&state.engine))
}

async fn state_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // Subscribe before the first snapshot so no update slips between them.
    let updates = BroadcastStream::new(state.engine.bus().subscribe());
    let engine = state.engine.clone();

    let opening = vec![
        Ok(Event::default().event("streaming-works").data("1")),
        Ok(Event::default().data(snapshot(&engine).to_string())),
    ];
    let stream = tokio_stream::iter(opening).chain(
        updates.map(move |_| Ok(Event::default().data(snapshot(&engine).to_string()))),
    );
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Deserialize)]
struct OtpUpdate {
    #[serde(default)]
    otp: String,
}

async fn put_otp(
    State(state): State<AppState>,
    Path(tracking): Path<String>,
    Json(body): Json<OtpUpdate>,
) -> Response {
    let otp = body.otp.trim();
    if otp.is_empty() {
        return error(StatusCode::BAD_REQUEST, "OTP is required");
    }
    state.engine.otps().save_otp(&tracking, otp);
    info!("✏️ OTP for {tracking} updated from dashboard");
    Json(json!({ "tracking": tracking, "otp": otp })).into_response()
}

async fn delete_delivery(State(state): State<AppState>, Path(tracking): Path<String>) -> Response {
    match state.engine.deliveries().remove(&tracking) {
        Ok(_) => {
            state.engine.otps().clear_tracking(&tracking);
            Json(json!({ "deleted": tracking })).into_response()
        }
        Err(e @ RemoveError::NotFound) => error(StatusCode::NOT_FOUND, &e.to_string()),
        Err(e @ RemoveError::AlreadyDelivered) => error(StatusCode::CONFLICT, &e.to_string()),
    }
}

async fn get_logs(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.logs.lines())
}

async fn get_settings(State(state): State<AppState>) -> Json<Map<String, Value>> {
    Json(state.settings.as_ref().clone())
}
