//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain.

pub mod error;
pub mod health;
pub mod run;
pub mod target;
pub mod webhook;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::service::PipelineController;

/// Create the main API router with all endpoints
pub fn create_router(controller: Arc<PipelineController>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Triggers
        .route("/api/webhook/push", post(webhook::push))
        // Run endpoints
        .route("/api/runs", get(run::list_runs))
        .route("/api/runs/{id}", get(run::get_run))
        .route("/api/runs/{id}/artifacts", get(run::list_artifacts))
        .route(
            "/api/runs/{id}/artifacts/{stage}/{name}",
            get(run::get_artifact),
        )
        .route("/api/runs/{id}/advance", post(run::advance_run))
        .route("/api/runs/{id}/approval", post(run::record_approval))
        .route("/api/runs/{id}/cancel", post(run::cancel_run))
        // Deployment targets
        .route("/api/targets/{service}", get(target::get_target))
        // Add state and middleware
        .with_state(controller)
        .layer(TraceLayer::new_for_http())
}
