//! HTTP surface: the REST API and the collaboration socket.
//!
//! Both listeners share one [`ApiState`]. `serve` syncs fleet repositories
//! before binding either of them.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub mod dto;
pub mod error;
pub mod openapi;
pub mod routes;
pub mod state;

use crate::collab::DocumentAccess;

pub use openapi::ApiDoc;
pub use state::ApiState;

fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Build the API router with all routes
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        // Health endpoints
        .route("/api/v1/health", get(routes::health::health))
        .route("/api/v1/status", get(routes::health::status))
        // Repository endpoints
        .route("/api/v1/repos", get(routes::repos::list))
        .route("/api/v1/changes", get(routes::repos::changes))
        .route("/api/v1/commit", post(routes::repos::commit))
        // Collaboration endpoints
        .route("/api/v1/sessions", get(routes::sessions::list))
        .route("/api/v1/openapi.json", get(openapi::spec))
        .layer(TraceLayer::new_for_http())
        .layer(cors())
        .with_state(state)
}

/// Build the router for the collaboration listener
pub fn build_collab_router(state: ApiState) -> Router {
    Router::new()
        .route("/collab", get(routes::collab::socket))
        .layer(TraceLayer::new_for_http())
        .layer(cors())
        .with_state(state)
}

/// Sync repositories, then run the REST API and the collaboration listener
/// until ctrl-c.
pub async fn serve(mut state: ApiState) -> Result<()> {
    let repos = state
        .sync
        .list_available()
        .await
        .context("No repositories to serve")?;
    info!(count = repos.len(), "Repositories ready");
    if repos.is_empty() {
        warn!("No fleet repository could be cloned");
    }

    if state.config.collab.restrict_to_repositories {
        let roots = repos.iter().map(|r| r.local_path.clone());
        state = state.with_access(DocumentAccess::restricted_to(roots));
    }

    let api_addr = SocketAddr::from(([0, 0, 0, 0], state.config.rest_api.port));
    let collab_addr = SocketAddr::from(([0, 0, 0, 0], state.config.collab.port));

    let api_listener = tokio::net::TcpListener::bind(api_addr)
        .await
        .with_context(|| format!("Failed to bind REST API on {api_addr}"))?;
    let collab_listener = tokio::net::TcpListener::bind(collab_addr)
        .await
        .with_context(|| format!("Failed to bind collaboration server on {collab_addr}"))?;

    info!("REST API listening on http://{}", api_addr);
    info!("Collaboration server listening on ws://{}/collab", collab_addr);

    let api = axum::serve(api_listener, build_router(state.clone()))
        .with_graceful_shutdown(shutdown_signal());
    let collab = axum::serve(collab_listener, build_collab_router(state))
        .with_graceful_shutdown(shutdown_signal());

    tokio::try_join!(
        async { api.await.context("REST API server failed") },
        async { collab.await.context("Collaboration server failed") },
    )?;

    info!("Servers stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
