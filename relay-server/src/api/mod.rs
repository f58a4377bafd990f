//! HTTP transport
//!
//! Maps connections onto the streaming controller:
//!
//! | Method | Path          | Description                                   |
//! |--------|---------------|-----------------------------------------------|
//! | GET    | `/`           | Redirect to `/home`                           |
//! | GET    | `/home`       | Listener page                                 |
//! | GET    | `/controller` | Controller page                               |
//! | POST   | `/controller` | `{"command": "start" \| "stop"}`              |
//! | GET    | `/stream`     | Live `audio/mpeg` stream (chunked)            |
//! | GET    | `/health`     | Health check                                  |
//! | GET    | anything else | Static file from the public directory         |

pub mod handlers;

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::controller::StreamingController;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<StreamingController>,
    /// Listener page, relative to the public directory
    pub home_page: String,
    /// Controller page, relative to the public directory
    pub controller_page: String,
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::redirect_home))
        .route("/home", get(handlers::home_page))
        .route(
            "/controller",
            get(handlers::controller_page).post(handlers::command),
        )
        .route("/stream", get(handlers::audio_stream))
        .route("/health", get(handlers::health))
        .fallback(handlers::static_file)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
