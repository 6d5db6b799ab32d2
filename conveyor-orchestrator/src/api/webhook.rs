//! Webhook API Handlers
//!
//! Entry point for push notifications from source control.

use std::sync::Arc;

use axum::{Json, extract::State};
use conveyor_core::domain::revision::PushEvent;
use conveyor_core::dto::trigger::PushOutcome;

use crate::api::error::ApiResult;
use crate::service::{PipelineController, spawn_drive};

/// POST /api/webhook/push
/// Start a run for a push on the target branch and drive it in the background
pub async fn push(
    State(controller): State<Arc<PipelineController>>,
    Json(event): Json<PushEvent>,
) -> ApiResult<Json<PushOutcome>> {
    tracing::info!("Push received: {}@{}", event.branch, event.revision_id);

    let outcome = controller.handle_push(event).await?;

    if let PushOutcome::Started { run_id } = &outcome {
        spawn_drive(controller.clone(), *run_id);
    }

    Ok(Json(outcome))
}
