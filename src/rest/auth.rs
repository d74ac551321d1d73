// rest/auth.rs — Bearer token auth middleware for daemon-local routes.
//
// Token is set via `api_token` in `{data_dir}/config.toml` or the
// NIMBUSD_API_TOKEN env var. Header: Authorization: Bearer <token>
//
// Control-plane passthrough routes are not behind this guard — there the
// Authorization header carries the end user's cloud access token instead.

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::sync::Arc;

use crate::AppContext;

pub async fn require_api_auth(
    State(ctx): State<Arc<AppContext>>,
    req: Request,
    next: Next,
) -> Response {
    // Extract Bearer token from Authorization header
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let expected = ctx.config.api_token.as_deref().unwrap_or("");

    if expected.is_empty() {
        // Auth disabled — allow all (loopback-only deployments)
        return next.run(req).await;
    }

    match token {
        Some(t) if t == expected => next.run(req).await,
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "success": false, "message": "Invalid or missing API token" })),
        )
            .into_response(),
    }
}

/// Pull the end user's cloud access token out of the Authorization header.
///
/// Used by the passthrough routes, which forward this token upstream rather
/// than comparing it against anything locally.
pub fn bearer_token(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}
