//! End-to-end tests of the REST gateway.
//! Spins up the axum server on a random port with a scripted control plane
//! and exercises the provisioning, project, module, and run endpoints.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;

use nimbusd::{
    config::HostConfig,
    control_plane::{ApiRequest, ApiResult, ControlPlane, Endpoints},
    provision::{RunRegistry, StepPolicies},
    storage::Storage,
    AppContext,
};

/// Find a free local port by binding to port 0.
fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Replays a fixed script of control-plane responses.
struct ScriptedControlPlane {
    script: Mutex<VecDeque<ApiResult>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedControlPlane {
    fn new(script: Vec<ApiResult>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ControlPlane for ScriptedControlPlane {
    async fn call(&self, req: ApiRequest) -> ApiResult {
        self.calls.lock().unwrap().push(req.url.clone());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ApiResult::Transport("script exhausted".into()))
    }
}

/// Build an AppContext on a random port with a scripted control plane.
async fn make_test_ctx(
    dir: &TempDir,
    port: u16,
    script: Vec<ApiResult>,
    api_token: Option<&str>,
) -> (Arc<AppContext>, Arc<ScriptedControlPlane>) {
    let data_dir = dir.path().to_path_buf();
    let mut config = HostConfig::new(
        Some(port),
        Some(data_dir.clone()),
        Some("error".to_string()),
        None,
    );
    config.api_token = api_token.map(str::to_string);

    let storage = Arc::new(Storage::new(&data_dir).await.unwrap());
    let host_id = nimbusd::identity::get_or_create(&storage).await.unwrap();
    let control = ScriptedControlPlane::new(script);
    let control_dyn: Arc<dyn ControlPlane> = control.clone();

    let ctx = Arc::new(AppContext {
        config: Arc::new(config),
        storage,
        control: control_dyn,
        endpoints: Endpoints::new("http://resource.test/v1", "http://platform.test/v1beta1"),
        policies: StepPolicies::instant(),
        runs: RunRegistry::new(),
        host_id,
        started_at: std::time::Instant::now(),
    });
    (ctx, control)
}

/// Spawn the gateway in the background and return its base URL.
async fn start_server(ctx: Arc<AppContext>) -> String {
    let base = format!("http://127.0.0.1:{}", ctx.config.port);
    tokio::spawn(async move {
        let _ = nimbusd::rest::serve(ctx).await;
    });
    // Give the server a moment to bind
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    base
}

fn happy_path_script() -> Vec<ApiResult> {
    vec![
        ApiResult::Ok(json!({"projectId": "x"})),
        ApiResult::Ok(json!({"lifecycleState": "PROVISIONING"})),
        ApiResult::Ok(json!({"lifecycleState": "ACTIVE"})),
        ApiResult::Ok(json!({})),
        ApiResult::Http {
            status: 404,
            body: json!({"error": {"message": "not found"}}),
        },
        ApiResult::Ok(json!({"clientId": "client-9"})),
        ApiResult::Ok(json!({"apiKey": "key-1", "authDomain": "fox.nimbusapp.dev"})),
    ]
}

#[tokio::test]
async fn health_reports_status_and_version() {
    let dir = TempDir::new().unwrap();
    let port = find_free_port();
    let (ctx, _) = make_test_ctx(&dir, port, vec![], None).await;
    let base = start_server(ctx).await;

    let resp = reqwest::get(format!("{base}/api/v1/health")).await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"].as_str().unwrap(), env!("CARGO_PKG_VERSION"));
    assert!(body["uptime_secs"].is_number());
    assert_eq!(body["hostId"].as_str().unwrap().len(), 36);
    assert_eq!(body["activeRuns"], 0);
}

#[tokio::test]
async fn provisioning_over_http_returns_the_full_report() {
    let dir = TempDir::new().unwrap();
    let port = find_free_port();
    let (ctx, control) = make_test_ctx(&dir, port, happy_path_script(), None).await;
    let base = start_server(ctx).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base}/api/v1/projects"))
        .json(&json!({"displayName": "Crafty Fox", "accessToken": "user-token"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["state"], "completed");
    assert_eq!(body["clientId"], "client-9");
    assert_eq!(body["clientConfig"]["apiKey"], "key-1");
    let project_id = body["projectId"].as_str().unwrap().to_string();
    assert!(project_id.starts_with("crafty-fox-"));
    assert_eq!(control.calls().len(), 7);

    // The terminal run is recorded and visible in the history endpoint;
    // nothing is left in the active set.
    let runs: Value = client
        .get(format!("{base}/api/v1/runs"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(runs["success"], true);
    assert_eq!(runs["active"].as_array().unwrap().len(), 0);
    let rows = runs["runs"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["projectId"], project_id.as_str());
    assert_eq!(rows[0]["state"], "completed");
    assert_eq!(rows[0]["clientId"], "client-9");
}

#[tokio::test]
async fn provisioning_requires_name_and_token() {
    let dir = TempDir::new().unwrap();
    let port = find_free_port();
    let (ctx, control) = make_test_ctx(&dir, port, vec![], None).await;
    let base = start_server(ctx).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base}/api/v1/projects"))
        .json(&json!({"displayName": "Crafty Fox"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "missing displayName or accessToken");
    assert!(control.calls().is_empty());
}

#[tokio::test]
async fn provisioning_rejects_invalid_display_names() {
    let dir = TempDir::new().unwrap();
    let port = find_free_port();
    let (ctx, control) = make_test_ctx(&dir, port, vec![], None).await;
    let base = start_server(ctx).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/api/v1/projects"))
        .json(&json!({"displayName": "bad_name!", "accessToken": "user-token"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().contains("letters"));
    assert!(control.calls().is_empty());
}

#[tokio::test]
async fn upstream_rejection_surfaces_as_bad_gateway() {
    let dir = TempDir::new().unwrap();
    let port = find_free_port();
    let script = vec![ApiResult::Http {
        status: 409,
        body: json!({"error": {"message": "project id already exists"}}),
    }];
    let (ctx, _) = make_test_ctx(&dir, port, script, None).await;
    let base = start_server(ctx).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/api/v1/projects"))
        .json(&json!({"displayName": "Crafty Fox", "accessToken": "user-token"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_GATEWAY);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["state"], "failed_create");
    assert_eq!(body["message"], "HTTP 409: project id already exists");
}

#[tokio::test]
async fn project_listing_filters_out_clientless_projects() {
    let dir = TempDir::new().unwrap();
    let port = find_free_port();
    let script = vec![
        ApiResult::Ok(json!({"results": [{"projectId": "alpha"}, {"projectId": "beta"}]})),
        ApiResult::Ok(json!({"clients": []})),
        ApiResult::Ok(json!({"clients": [{"clientId": "c1"}]})),
    ];
    let (ctx, _) = make_test_ctx(&dir, port, script, None).await;
    let base = start_server(ctx).await;

    let resp = reqwest::Client::new()
        .get(format!("{base}/api/v1/projects"))
        .bearer_auth("user-token")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["results"], json!([{"projectId": "beta"}]));
}

#[tokio::test]
async fn project_listing_requires_a_bearer_token() {
    let dir = TempDir::new().unwrap();
    let port = find_free_port();
    let (ctx, control) = make_test_ctx(&dir, port, vec![], None).await;
    let base = start_server(ctx).await;

    let resp = reqwest::get(format!("{base}/api/v1/projects")).await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "missing access token");
    assert!(control.calls().is_empty());
}

#[tokio::test]
async fn project_listing_passes_upstream_failures_through() {
    let dir = TempDir::new().unwrap();
    let port = find_free_port();
    let script = vec![ApiResult::Http {
        status: 401,
        body: json!({"error": {"message": "invalid credential"}}),
    }];
    let (ctx, _) = make_test_ctx(&dir, port, script, None).await;
    let base = start_server(ctx).await;

    let resp = reqwest::Client::new()
        .get(format!("{base}/api/v1/projects"))
        .bearer_auth("expired-token")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_GATEWAY);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(
        body["message"],
        "error listing projects: HTTP 401: invalid credential"
    );
}

#[tokio::test]
async fn config_endpoint_fetches_the_first_client() {
    let dir = TempDir::new().unwrap();
    let port = find_free_port();
    let script = vec![
        ApiResult::Ok(json!({"clients": [{"clientId": "client-5"}, {"clientId": "client-6"}]})),
        ApiResult::Ok(json!({"apiKey": "xyz", "authDomain": "beta.nimbusapp.dev"})),
    ];
    let (ctx, control) = make_test_ctx(&dir, port, script, None).await;
    let base = start_server(ctx).await;

    let resp = reqwest::Client::new()
        .get(format!("{base}/api/v1/projects/beta/config"))
        .bearer_auth("user-token")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["clientConfig"]["apiKey"], "xyz");

    let calls = control.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[1].ends_with("/projects/beta/clientApps/client-5/config"));
}

#[tokio::test]
async fn config_endpoint_404s_without_registered_clients() {
    let dir = TempDir::new().unwrap();
    let port = find_free_port();
    let script = vec![ApiResult::Ok(json!({"clients": []}))];
    let (ctx, _) = make_test_ctx(&dir, port, script, None).await;
    let base = start_server(ctx).await;

    let resp = reqwest::Client::new()
        .get(format!("{base}/api/v1/projects/empty/config"))
        .bearer_auth("user-token")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "no registered clients for project");
}

#[tokio::test]
async fn module_endpoint_renders_the_selection() {
    let dir = TempDir::new().unwrap();
    let port = find_free_port();
    let (ctx, _) = make_test_ctx(&dir, port, vec![], None).await;
    let base = start_server(ctx).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/api/v1/module"))
        .json(&json!({
            "features": {"Storage": true},
            "settings": {"Storage": ["Enable File Versioning"]},
            "clientConfig": {"apiKey": "x"}
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["filename"], "nimbus.js");
    let content = body["content"].as_str().unwrap();
    assert!(content.contains(r#"import { getStorage } from "nimbus/storage";"#));
    assert!(content.contains("storage.enableVersioning();"));
    assert!(content.contains(r#""apiKey": "x""#));
}

#[tokio::test]
async fn module_endpoint_rejects_an_empty_config() {
    let dir = TempDir::new().unwrap();
    let port = find_free_port();
    let (ctx, _) = make_test_ctx(&dir, port, vec![], None).await;
    let base = start_server(ctx).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/api/v1/module"))
        .json(&json!({"features": {"Storage": true}}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "client configuration is missing or empty");
}

#[tokio::test]
async fn api_token_guards_daemon_routes_but_not_cloud_routes() {
    let dir = TempDir::new().unwrap();
    let port = find_free_port();
    let (ctx, _) = make_test_ctx(&dir, port, vec![], Some("secret")).await;
    let base = start_server(ctx).await;

    let client = reqwest::Client::new();
    let module_body = json!({
        "features": {},
        "settings": {},
        "clientConfig": {"apiKey": "x"}
    });

    // Daemon-local route without the token: rejected.
    let resp = client
        .post(format!("{base}/api/v1/module"))
        .json(&module_body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);

    // Wrong token: rejected.
    let resp = client
        .post(format!("{base}/api/v1/module"))
        .bearer_auth("wrong")
        .json(&module_body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);

    // Correct token: accepted.
    let resp = client
        .post(format!("{base}/api/v1/module"))
        .bearer_auth("secret")
        .json(&module_body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);

    // Health stays public.
    let resp = reqwest::get(format!("{base}/api/v1/health")).await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
}

#[tokio::test]
async fn cancelling_an_unknown_run_is_a_404() {
    let dir = TempDir::new().unwrap();
    let port = find_free_port();
    let (ctx, _) = make_test_ctx(&dir, port, vec![], None).await;
    let base = start_server(ctx).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/api/v1/runs/no-such-project/cancel"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "no active run for project");
}
