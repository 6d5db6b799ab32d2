//! Run-related API endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use conveyor_core::domain::run::{PipelineRun, StageName};
use conveyor_core::dto::artifact::ArtifactSummary;
use conveyor_core::dto::run::{AdvanceResponse, RunSummary};
use uuid::Uuid;

impl OrchestratorClient {
    // =============================================================================
    // Status
    // =============================================================================

    /// List all runs, newest first
    pub async fn list_runs(&self) -> Result<Vec<RunSummary>> {
        let url = self.url("/api/runs");
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Get a run by ID
    ///
    /// # Arguments
    /// * `run_id` - The run UUID
    ///
    /// # Returns
    /// The run with its per-stage records and terminal failure, if any
    pub async fn get_run(&self, run_id: Uuid) -> Result<PipelineRun> {
        let url = self.url(&format!("/api/runs/{}", run_id));
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// List the artifacts sealed for a run, in sealing order
    pub async fn list_artifacts(&self, run_id: Uuid) -> Result<Vec<ArtifactSummary>> {
        let url = self.url(&format!("/api/runs/{}/artifacts", run_id));
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Fetch the content of one artifact
    ///
    /// # Arguments
    /// * `run_id` - The run UUID
    /// * `stage` - The stage that sealed the artifact
    /// * `name` - Artifact name (e.g., "imagedefinitions.json")
    pub async fn get_artifact_content(
        &self,
        run_id: Uuid,
        stage: StageName,
        name: &str,
    ) -> Result<Vec<u8>> {
        let url = self.url(&format!("/api/runs/{}/artifacts/{}/{}", run_id, stage, name));
        let response = self.client.get(&url).send().await?;

        self.handle_bytes_response(response).await
    }

    // =============================================================================
    // Control
    // =============================================================================

    /// Execute the current stage of a run once
    ///
    /// # Returns
    /// What the call did and the run afterwards
    pub async fn advance_run(&self, run_id: Uuid) -> Result<AdvanceResponse> {
        let url = self.url(&format!("/api/runs/{}/advance", run_id));
        let response = self.client.post(&url).send().await?;

        self.handle_response(response).await
    }

    /// Cancel a run that has not entered the deploy stage
    pub async fn cancel_run(&self, run_id: Uuid) -> Result<PipelineRun> {
        let url = self.url(&format!("/api/runs/{}/cancel", run_id));
        let response = self.client.post(&url).send().await?;

        self.handle_response(response).await
    }
}
