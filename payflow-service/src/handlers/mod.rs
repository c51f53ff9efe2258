//! HTTP handlers for the PayFlow REST API.

pub mod clients;
pub mod invoices;
pub mod payments;

use axum::{Json, http::StatusCode, response::IntoResponse};
use serde_json::json;

/// Health check endpoint for liveness probes.
pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "service": "payflow-service",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// Keyset pagination token: present when the page came back full.
pub(crate) fn next_page_token<T>(
    rows: &[T],
    page_size: Option<i32>,
    id_of: impl Fn(&T) -> uuid::Uuid,
) -> Option<uuid::Uuid> {
    let limit = page_size.unwrap_or(50).clamp(1, 100) as usize;
    if rows.len() == limit {
        rows.last().map(id_of)
    } else {
        None
    }
}

pub(crate) fn default_page_size(page_size: Option<i32>) -> i32 {
    page_size.unwrap_or(50)
}
