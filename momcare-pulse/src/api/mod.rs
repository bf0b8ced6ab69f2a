//! HTTP API: polling, SSE streaming, alert checks and status.
//!
//! Routes live under `/heart-rate`; the root-level aliases are the paths
//! the web client has always called.

pub mod error;
pub mod handlers;
pub mod stream;

use crate::directory::RecipientDirectory;
use crate::engine::PulseHub;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub hub: PulseHub,
    pub directory: Arc<dyn RecipientDirectory>,
}

/// Builds the API router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let heart_rate = Router::new()
        .route("/bpm-current", get(handlers::bpm_current))
        .route("/bpm-events", get(handlers::bpm_events))
        .route("/checkHighBPM", post(handlers::check_high_bpm))
        .route("/status", get(handlers::status))
        .route("/history", get(handlers::history));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/getBPM", post(handlers::get_bpm))
        .route("/bpm-events", get(handlers::bpm_events))
        .route("/checkHighBPM", post(handlers::check_high_bpm))
        .nest("/heart-rate", heart_rate)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
