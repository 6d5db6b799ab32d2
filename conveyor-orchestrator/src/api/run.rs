//! Run API Handlers
//!
//! HTTP endpoints for run status, manual advancing, approvals and cancellation.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::header,
    response::IntoResponse,
};
use conveyor_core::domain::approval::ApprovalDecision;
use conveyor_core::domain::artifact::ArtifactKey;
use conveyor_core::domain::run::{PipelineRun, StageName};
use conveyor_core::dto::approval::RecordApproval;
use conveyor_core::dto::artifact::ArtifactSummary;
use conveyor_core::dto::run::{AdvanceResponse, RunSummary};
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult};
use crate::service::{PipelineController, spawn_drive};

// =============================================================================
// Status Endpoints
// =============================================================================

/// GET /api/runs
/// List all runs, newest first
pub async fn list_runs(
    State(controller): State<Arc<PipelineController>>,
) -> ApiResult<Json<Vec<RunSummary>>> {
    tracing::debug!("Listing runs");

    let runs = controller.list_runs().await?;
    Ok(Json(runs.iter().map(RunSummary::from).collect()))
}

/// GET /api/runs/{id}
pub async fn get_run(
    State(controller): State<Arc<PipelineController>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PipelineRun>> {
    tracing::debug!("Getting run: {}", id);

    Ok(Json(controller.get_status(id).await?))
}

/// GET /api/runs/{id}/artifacts
/// Artifact metadata in sealing order
pub async fn list_artifacts(
    State(controller): State<Arc<PipelineController>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<ArtifactSummary>>> {
    tracing::debug!("Listing artifacts for run: {}", id);

    let artifacts = controller.list_artifacts(id).await?;
    Ok(Json(artifacts.iter().map(ArtifactSummary::from).collect()))
}

/// GET /api/runs/{id}/artifacts/{stage}/{name}
/// Raw artifact content
pub async fn get_artifact(
    State(controller): State<Arc<PipelineController>>,
    Path((id, stage, name)): Path<(Uuid, String, String)>,
) -> ApiResult<impl IntoResponse> {
    let stage = stage.parse::<StageName>().map_err(ApiError::BadRequest)?;
    let key = ArtifactKey::new(id, stage, name);

    let artifact = controller.get_artifact(&key).await?;
    Ok(([(header::CONTENT_TYPE, artifact.content_type)], artifact.content))
}

// =============================================================================
// Control Endpoints
// =============================================================================

/// POST /api/runs/{id}/advance
/// Execute the current stage once
pub async fn advance_run(
    State(controller): State<Arc<PipelineController>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<AdvanceResponse>> {
    tracing::info!("Advancing run: {}", id);

    Ok(Json(controller.advance(id).await?))
}

/// POST /api/runs/{id}/approval
/// Record the approval decision and resume the run
pub async fn record_approval(
    State(controller): State<Arc<PipelineController>>,
    Path(id): Path<Uuid>,
    Json(req): Json<RecordApproval>,
) -> ApiResult<Json<ApprovalDecision>> {
    tracing::info!("Recording {} for run {} by {}", req.decision, id, req.actor);

    let decision = controller.record_approval(id, req).await?;
    spawn_drive(controller.clone(), id);

    Ok(Json(decision))
}

/// POST /api/runs/{id}/cancel
pub async fn cancel_run(
    State(controller): State<Arc<PipelineController>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PipelineRun>> {
    tracing::info!("Cancelling run: {}", id);

    Ok(Json(controller.cancel(id).await?))
}
