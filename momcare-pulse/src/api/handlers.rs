//! Route handlers.

use super::error::ApiError;
use super::stream::BpmEventStream;
use super::AppState;
use crate::common::{Bpm, SourceKind};
use crate::components::alert::AlertDecision;
use crate::directory::{normalize_email, MedicalEvent};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::response::sse::{KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

// --- Request/Response Types ---

#[derive(Debug, Serialize)]
pub struct BpmResponse {
    pub bpm: Option<Bpm>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EmailRequest {
    #[serde(default)]
    pub email: Option<String>,
}

impl EmailRequest {
    /// The normalized email, or `None` when absent or blank.
    fn recipient(&self) -> Option<String> {
        self.email
            .as_deref()
            .map(normalize_email)
            .filter(|e| !e.is_empty())
    }
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub alert: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: &'static str,
    #[serde(rename = "latestBPM")]
    pub latest_bpm: Option<Bpm>,
    pub timestamp: String,
    pub subscribers: usize,
    pub source: Option<SourceKind>,
    pub uptime_seconds: i64,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub email: String,
    pub events: Vec<MedicalEvent>,
}

// --- Handler Functions ---

pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "momcare-pulse",
        "version": crate::VERSION
    }))
}

pub async fn bpm_current(State(state): State<AppState>) -> Json<BpmResponse> {
    Json(BpmResponse {
        bpm: state.hub.latest().await,
    })
}

pub async fn get_bpm(State(state): State<AppState>) -> Result<Json<BpmResponse>, ApiError> {
    match state.hub.latest().await {
        Some(bpm) => Ok(Json(BpmResponse { bpm: Some(bpm) })),
        None => Err(ApiError::BpmNotYetAvailable),
    }
}

pub async fn bpm_events(State(state): State<AppState>) -> impl IntoResponse {
    let server = &state.hub.config().server;
    let stream = BpmEventStream::open(&state.hub, server.stream_buffer).await;
    debug!("BPM stream client connected as {:?}", stream.subscription());
    Sse::new(stream).keep_alive(KeepAlive::new().interval(server.keep_alive()))
}

pub async fn check_high_bpm(
    State(state): State<AppState>,
    body: Result<Json<EmailRequest>, JsonRejection>,
) -> Result<Json<CheckResponse>, ApiError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let recipient = request.recipient().ok_or(ApiError::MissingEmail)?;
    let outcome = state
        .hub
        .check_high_bpm(&recipient)
        .await
        .ok_or(ApiError::BpmDataUnavailable)?;

    let message = match outcome.decision {
        AlertDecision::Clear => None,
        AlertDecision::Dispatch => {
            info!("High heart rate alert for {}: {} BPM", recipient, outcome.bpm);
            Some(high_bpm_message(outcome.bpm))
        }
        AlertDecision::Suppressed { .. } => Some(repeated_high_bpm_message(outcome.bpm)),
    };
    Ok(Json(CheckResponse {
        alert: outcome.is_alert(),
        message,
    }))
}

pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let status = state.hub.status().await;
    Json(StatusResponse {
        status: "running",
        latest_bpm: status.latest,
        timestamp: rfc3339(status.timestamp),
        subscribers: status.subscribers,
        source: status.source,
        uptime_seconds: (status.timestamp - status.started_at).num_seconds(),
    })
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub email: Option<String>,
}

pub async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let email = query
        .email
        .as_deref()
        .map(normalize_email)
        .filter(|e| !e.is_empty())
        .ok_or(ApiError::MissingEmail)?;
    let events = state
        .directory
        .history(&email)
        .await
        .ok_or(ApiError::UnknownRecipient)?;
    Ok(Json(HistoryResponse { email, events }))
}

pub fn high_bpm_message(bpm: Bpm) -> String {
    format!(
        "High heart rate detected ({} BPM). Please take a moment to rest.",
        bpm
    )
}

/// Sent while the cooldown holds back a repeat alert.
pub fn repeated_high_bpm_message(bpm: Bpm) -> String {
    format!(
        "High heart rate detected ({} BPM). You were alerted recently; please keep resting.",
        bpm
    )
}

fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
