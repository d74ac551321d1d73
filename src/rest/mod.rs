// rest/mod.rs — Provisioning gateway REST API.
//
// Axum HTTP server the setup wizard talks to. CORS is permissive because the
// wizard runs on a browser origin, not on the daemon's port.
//
// Endpoints:
//   GET  /api/v1/health
//   POST /api/v1/projects                  run the provisioning workflow
//   GET  /api/v1/projects                  list projects with registered clients
//   GET  /api/v1/projects/{id}/config      fetch a project's client config
//   POST /api/v1/module                    assemble a nimbus.js module
//   GET  /api/v1/runs                      active + recorded runs
//   POST /api/v1/runs/{project_id}/cancel  cancel an in-flight run
//
// Two credentials are in play. Control-plane endpoints (the /projects family)
// authenticate with the end user's cloud access token, forwarded verbatim to
// the upstream APIs. Daemon-local endpoints (/module, /runs) are optionally
// guarded by the static `api_token` from config.

pub mod auth;
pub mod routes;

use anyhow::Result;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::AppContext;

pub async fn serve(ctx: Arc<AppContext>) -> Result<()> {
    let bind = format!("{}:{}", ctx.config.bind_address, ctx.config.port);
    let addr: SocketAddr = bind.parse()?;

    let router = build_router(ctx);

    info!("gateway listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(make_shutdown_future())
        .await?;
    info!("gateway stopped");
    Ok(())
}

pub fn build_router(ctx: Arc<AppContext>) -> Router {
    // Daemon-local routes sit behind the api_token guard (a no-op when no
    // token is configured).
    let guarded = Router::new()
        .route("/api/v1/module", post(routes::module::render_module))
        .route("/api/v1/runs", get(routes::runs::list_runs))
        .route(
            "/api/v1/runs/{project_id}/cancel",
            post(routes::runs::cancel_run),
        )
        .route_layer(middleware::from_fn_with_state(
            ctx.clone(),
            auth::require_api_auth,
        ));

    Router::new()
        // Health (no auth)
        .route("/api/v1/health", get(routes::health::health))
        // Control-plane passthrough — the user's bearer token is the credential
        .route(
            "/api/v1/projects",
            get(routes::projects::list_projects).post(routes::projects::create_project),
        )
        .route(
            "/api/v1/projects/{id}/config",
            get(routes::projects::get_project_config),
        )
        .merge(guarded)
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

/// Returns a future that resolves when a shutdown signal is received.
///
/// On Unix we listen for SIGTERM *and* Ctrl-C.
/// On other platforms we listen for Ctrl-C only.
async fn make_shutdown_future() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(err = %e, "failed to register SIGTERM — Ctrl-C only");
                tokio::signal::ctrl_c().await.ok();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}
