//! Response helpers shared by the HTTP handlers.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use serde_json::json;

/// `200 OK` with a JSON body.
pub fn api_success<T: Serialize>(data: T) -> impl IntoResponse {
    (StatusCode::OK, Json(data))
}

/// `202 Accepted` with `{ "accepted": true }`, for work that continues in
/// the background.
pub fn api_accepted() -> impl IntoResponse {
    (StatusCode::ACCEPTED, Json(json!({ "accepted": true })))
}
