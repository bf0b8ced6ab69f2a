//! Client-facing errors and their JSON bodies.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("Email is required")]
    MissingEmail,
    /// Polling before the first sample.
    #[error("BPM not available yet")]
    BpmNotYetAvailable,
    /// Alert check before the first sample.
    #[error("BPM data not available")]
    BpmDataUnavailable,
    #[error("User not found")]
    UnknownRecipient,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingEmail => StatusCode::BAD_REQUEST,
            ApiError::BpmNotYetAvailable
            | ApiError::BpmDataUnavailable
            | ApiError::UnknownRecipient => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.to_string() });
        (self.status(), Json(body)).into_response()
    }
}
