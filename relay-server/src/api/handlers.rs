//! HTTP request handlers

use axum::{
    body::Body,
    extract::State,
    http::{header, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use futures::StreamExt;
use serde::Serialize;
use std::convert::Infallible;
use tokio_util::io::ReaderStream;
use tracing::{error, info};

use super::AppState;
use crate::controller::{CommandRequest, CommandResponse};
use crate::error::Error;
use crate::streaming::PipelineState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
    build: String,
    streaming: bool,
    listeners: usize,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    status: String,
}

fn error_response(err: Error) -> (StatusCode, Json<StatusResponse>) {
    let code = match err {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        _ => {
            error!(error = %err, "Request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (
        code,
        Json(StatusResponse {
            status: format!("error: {}", err),
        }),
    )
}

async fn serve_file(state: &AppState, name: &str) -> Response {
    match state.controller.get_file_stream(name).await {
        Ok(file) => (
            [(header::CONTENT_TYPE, file.content_type)],
            Body::from_stream(ReaderStream::new(file.stream)),
        )
            .into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

// ============================================================================
// Pages
// ============================================================================

/// GET / - Redirect to the listener page
pub async fn redirect_home() -> impl IntoResponse {
    (StatusCode::FOUND, [(header::LOCATION, "/home")])
}

/// GET /home
pub async fn home_page(State(state): State<AppState>) -> Response {
    serve_file(&state, &state.home_page).await
}

/// GET /controller
pub async fn controller_page(State(state): State<AppState>) -> Response {
    serve_file(&state, &state.controller_page).await
}

/// Fallback - static files from the public directory
pub async fn static_file(State(state): State<AppState>, method: Method, uri: Uri) -> Response {
    if method != Method::GET {
        return error_response(Error::NotFound(uri.path().to_string())).into_response();
    }
    serve_file(&state, uri.path()).await
}

// ============================================================================
// Streaming
// ============================================================================

/// POST /controller - Start/stop commands; unknown commands are accepted
pub async fn command(
    State(state): State<AppState>,
    Json(request): Json<CommandRequest>,
) -> Json<CommandResponse> {
    info!(command = %request.command, "Command received");
    Json(state.controller.handle_command(request))
}

/// GET /stream - Live audio for a new listener
///
/// The listener stays attached for as long as the response body is alive; the
/// connection closing drops the body and detaches it.
pub async fn audio_stream(State(state): State<AppState>) -> Response {
    let connection = state.controller.attach_client();
    let body = Body::from_stream(connection.map(Ok::<_, Infallible>));
    ([(header::CONTENT_TYPE, "audio/mpeg")], body).into_response()
}

// ============================================================================
// Health Endpoint
// ============================================================================

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        module: "relay-server".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        build: env!("GIT_HASH").to_string(),
        streaming: state.controller.state() == PipelineState::Streaming,
        listeners: state.controller.listener_count(),
    })
}
