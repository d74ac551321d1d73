// rest/routes/projects.rs — Provisioning and control-plane passthrough routes.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, warn};

use crate::control_plane::{error_message, ApiRequest, ApiResult};
use crate::provision::{ProjectId, ProvisionRequest, ProvisioningWorkflow, WorkflowState};
use crate::rest::auth::bearer_token;
use crate::retry::{CancelOnDrop, CancelToken};
use crate::AppContext;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectRequest {
    pub display_name: Option<String>,
    pub access_token: Option<String>,
}

/// POST /api/v1/projects — run the full provisioning workflow.
///
/// The response is held open until the run reaches a terminal state, exactly
/// like the wizard expects. The run itself executes on a spawned task: if the
/// caller disconnects mid-run, dropping this handler trips the run's cancel
/// token and the task winds down at its next checkpoint, still recording a
/// terminal row.
pub async fn create_project(
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<CreateProjectRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let (display_name, access_token) = match (body.display_name, body.access_token) {
        (Some(n), Some(t)) if !t.is_empty() => (n, t),
        _ => {
            return Err(reject(
                StatusCode::BAD_REQUEST,
                "missing displayName or accessToken",
            ))
        }
    };

    let project_id = ProjectId::now(&display_name)
        .map_err(|e| reject(StatusCode::BAD_REQUEST, &e.to_string()))?;

    let cancel = CancelToken::new();
    ctx.runs.register(&project_id, cancel.clone());
    let guard = CancelOnDrop::new(cancel.clone());

    let task = tokio::spawn({
        let ctx = ctx.clone();
        let project_id = project_id.clone();
        let request = ProvisionRequest {
            display_name: display_name.clone(),
            access_token,
        };
        async move {
            let workflow = ProvisioningWorkflow::new(
                ctx.control.clone(),
                ctx.endpoints.clone(),
                ctx.policies.clone(),
            );
            let report = workflow
                .run_with_id(project_id.clone(), &request, &cancel)
                .await;

            if let Err(e) = ctx
                .storage
                .record_run(
                    report.project_id.as_str(),
                    &request.display_name,
                    &report.state.to_string(),
                    report.client_id.as_deref(),
                    report.error.as_deref(),
                )
                .await
            {
                warn!(err = %e, project_id = %report.project_id, "failed to record provisioning run");
            }
            ctx.runs.deregister(&project_id);
            report
        }
    });

    let report = match task.await {
        Ok(report) => report,
        Err(e) => {
            // Task panicked; the registry entry is orphaned — drop it here.
            error!(err = %e, project_id = %project_id, "provisioning task failed");
            ctx.runs.deregister(&project_id);
            return Err(reject(
                StatusCode::INTERNAL_SERVER_ERROR,
                "provisioning task failed",
            ));
        }
    };
    guard.disarm();

    if report.succeeded() {
        return Ok(Json(json!({
            "success": true,
            "projectId": report.project_id.as_str(),
            "clientId": report.client_id,
            "state": report.state.to_string(),
            "clientConfig": report.client_config,
        })));
    }

    let body = json!({
        "success": false,
        "projectId": report.project_id.as_str(),
        "state": report.state.to_string(),
        "message": report.error.unwrap_or_else(|| "provisioning failed".to_string()),
    });
    match report.state {
        // A cancelled run is a completed request, not an upstream failure.
        WorkflowState::Cancelled => Ok(Json(body)),
        _ => Err((StatusCode::BAD_GATEWAY, Json(body))),
    }
}

/// GET /api/v1/projects — projects that have at least one registered client.
///
/// Mirrors the wizard's import path: list everything the user's token can
/// see, then keep only projects a config could actually be fetched for.
pub async fn list_projects(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let token = bearer_token(&headers)
        .ok_or_else(|| reject(StatusCode::BAD_REQUEST, "missing access token"))?;

    let listing = ctx
        .control
        .call(ApiRequest::get(ctx.endpoints.list_projects(), token.clone()))
        .await;
    let body = expect_ok(listing, "error listing projects")?;

    let results = body
        .get("results")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            reject(
                StatusCode::BAD_GATEWAY,
                "'results' key is missing or not an array",
            )
        })?;

    let mut with_clients = Vec::new();
    for project in results {
        let Some(pid) = project.get("projectId").and_then(Value::as_str) else {
            continue;
        };
        let clients = ctx
            .control
            .call(ApiRequest::get(ctx.endpoints.list_clients(pid), token.clone()))
            .await;
        // A project whose client listing fails is silently skipped; this is a
        // filter, not a fan-out that should fail the whole request.
        if let ApiResult::Ok(clients_body) = clients {
            let has_clients = clients_body
                .get("clients")
                .and_then(Value::as_array)
                .is_some_and(|apps| !apps.is_empty());
            if has_clients {
                with_clients.push(project.clone());
            }
        }
    }

    Ok(Json(json!({ "success": true, "results": with_clients })))
}

/// GET /api/v1/projects/{id}/config — fetch the first client's configuration.
pub async fn get_project_config(
    State(ctx): State<Arc<AppContext>>,
    Path(project_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let token = bearer_token(&headers)
        .ok_or_else(|| reject(StatusCode::BAD_REQUEST, "missing access token"))?;

    let listing = ctx
        .control
        .call(ApiRequest::get(
            ctx.endpoints.list_clients(&project_id),
            token.clone(),
        ))
        .await;
    let body = expect_ok(listing, "error listing clients")?;

    let client_id = body
        .get("clients")
        .and_then(Value::as_array)
        .and_then(|clients| clients.first())
        .and_then(|client| client.get("clientId"))
        .and_then(Value::as_str)
        .ok_or_else(|| {
            reject(
                StatusCode::NOT_FOUND,
                "no registered clients for project",
            )
        })?;

    let config = ctx
        .control
        .call(ApiRequest::get(
            ctx.endpoints.client_config(&project_id, client_id),
            token,
        ))
        .await;
    let config = expect_ok(config, "error fetching client config")?;

    Ok(Json(json!({ "success": true, "clientConfig": config })))
}

fn reject(status: StatusCode, message: &str) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "success": false, "message": message })))
}

/// Unwrap a control-plane result or surface the upstream failure as a 502
/// with the upstream body's message preserved.
fn expect_ok(result: ApiResult, context: &str) -> Result<Value, (StatusCode, Json<Value>)> {
    match result {
        ApiResult::Ok(body) => Ok(body),
        ApiResult::Http { status, body } => Err(reject(
            StatusCode::BAD_GATEWAY,
            &format!("{context}: HTTP {status}: {}", error_message(&body)),
        )),
        ApiResult::Transport(e) => Err(reject(
            StatusCode::BAD_GATEWAY,
            &format!("{context}: transport error: {e}"),
        )),
    }
}
