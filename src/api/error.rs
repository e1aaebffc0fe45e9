// src/api/error.rs
// Request validation errors rejected at the HTTP edge before any event is
// emitted (spec.md §7 item 2), following the teacher's pattern of mapping
// a typed service error straight to a status code via `IntoResponse`
// rather than threading raw strings through handlers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("input.message must be between 1 and 2000 characters")]
    InvalidMessageLength,
    #[error("conversation.id must not be empty")]
    MissingConversationId,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
