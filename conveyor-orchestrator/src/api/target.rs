//! Deployment Target API Handlers

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
};
use conveyor_core::domain::target::DeploymentTarget;

use crate::api::error::ApiResult;
use crate::service::PipelineController;

/// GET /api/targets/{service}
/// Desired state of a running service
pub async fn get_target(
    State(controller): State<Arc<PipelineController>>,
    Path(service): Path<String>,
) -> ApiResult<Json<DeploymentTarget>> {
    tracing::debug!("Getting deployment target: {}", service);

    Ok(Json(controller.describe_target(&service).await?))
}
