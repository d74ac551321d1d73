// rest/routes/runs.rs — Run history and cancellation.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info};

use crate::AppContext;

#[derive(Deserialize)]
pub struct ListRunsQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

/// GET /api/v1/runs — recent terminal runs plus the ids currently in flight.
pub async fn list_runs(
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<ListRunsQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let rows = ctx.storage.list_runs(query.limit).await.map_err(|e| {
        error!(err = %e, "failed to list provisioning runs");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "success": false, "message": "failed to list runs" })),
        )
    })?;

    Ok(Json(json!({
        "success": true,
        "active": ctx.runs.active_ids(),
        "runs": rows,
    })))
}

/// POST /api/v1/runs/{project_id}/cancel — trip an in-flight run's token.
///
/// The run stops at its next checkpoint; an HTTP call already in flight
/// completes first, so the response here only acknowledges the request.
pub async fn cancel_run(
    State(ctx): State<Arc<AppContext>>,
    Path(project_id): Path<String>,
) -> (StatusCode, Json<Value>) {
    if ctx.runs.cancel(&project_id) {
        info!(project_id = %project_id, "run cancellation requested");
        (
            StatusCode::OK,
            Json(json!({ "success": true, "message": "cancellation requested" })),
        )
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "success": false, "message": "no active run for project" })),
        )
    }
}
