//! HTTP API Server
//!
//! REST API for readiness probes, status queries, and graceful remote
//! shutdown of the node.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::CorsLayer;

use crate::config::ApiConfig;
use crate::error::{Error, Result};
use crate::node::NodeLifecycle;

/// Shared application state
struct AppState {
    lifecycle: Arc<NodeLifecycle>,
}

/// HTTP API server
pub struct HttpServer {
    config: ApiConfig,
    state: Arc<AppState>,
}

impl HttpServer {
    /// Create a new HTTP server over a lifecycle controller
    pub fn new(config: ApiConfig, lifecycle: Arc<NodeLifecycle>) -> Self {
        Self {
            config,
            state: Arc::new(AppState { lifecycle }),
        }
    }

    /// Create the router
    fn create_router(state: Arc<AppState>, cors_enabled: bool) -> Router {
        let router = Router::new()
            .route("/status", get(handle_status))
            .route("/health", get(handle_health))
            .route("/ready", get(handle_ready))
            .route("/admin/shutdown", post(handle_shutdown))
            .with_state(state);

        if cors_enabled {
            router.layer(CorsLayer::permissive())
        } else {
            router
        }
    }

    /// Start the HTTP server
    pub async fn start(&self) -> Result<()> {
        if !self.config.enabled {
            tracing::info!("HTTP API disabled");
            return Ok(());
        }

        let app = Self::create_router(Arc::clone(&self.state), self.config.cors_enabled);

        let listener = tokio::net::TcpListener::bind(&self.config.bind_address).await?;
        tracing::info!("HTTP API listening on {}", self.config.bind_address);

        axum::serve(listener, app)
            .await
            .map_err(|e| Error::Network(format!("HTTP server error: {}", e)))?;

        Ok(())
    }
}

// ============ Response Types ============

/// Status response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub node_id: String,
    pub state: String,
    pub is_leader: bool,
    pub leader_id: Option<String>,
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub node_id: String,
    pub is_leader: bool,
}

/// Shutdown response
#[derive(Debug, Serialize)]
pub struct ShutdownResponse {
    pub shutting_down: bool,
}

// ============ Handlers ============

async fn handle_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let lifecycle = &state.lifecycle;
    Json(StatusResponse {
        node_id: lifecycle.node_id().to_string(),
        state: lifecycle.state().await.to_string(),
        is_leader: lifecycle.is_leader().await,
        leader_id: lifecycle.current_leader().await,
    })
}

async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let lifecycle = &state.lifecycle;
    Json(HealthResponse {
        healthy: true,
        node_id: lifecycle.node_id().to_string(),
        is_leader: lifecycle.is_leader().await,
    })
}

async fn handle_ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if *state.lifecycle.readiness().borrow() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

async fn handle_shutdown(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.lifecycle.shutdown();
    Json(ShutdownResponse {
        shutting_down: true,
    })
}
