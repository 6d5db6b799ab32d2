//! Deploy stage
//!
//! Sends one update request per manifest entry to the external orchestrator.
//! All requests of one deploy happen while holding the admission guard of the
//! deployment target. The stage is done once every request is accepted; it does
//! not wait for the service to converge.

use std::sync::Arc;
use std::time::Duration;

use conveyor_core::domain::artifact::Artifact;
use conveyor_core::domain::manifest::{MANIFEST_ARTIFACT, Manifest};
use conveyor_core::domain::run::DEPLOYMENT_ARTIFACT;
use conveyor_core::domain::target::DeploymentResult;
use conveyor_core::error::StageError;
use tracing::{error, info};

use super::{StageOutput, decode, encode, input};
use crate::admission::DeployAdmission;
use crate::collaborators::ServiceOrchestrator;

pub struct DeployStage {
    orchestrator: Arc<dyn ServiceOrchestrator>,
    admission: DeployAdmission,
    service: String,
    deploy_timeout: Duration,
}

impl DeployStage {
    pub fn new(
        orchestrator: Arc<dyn ServiceOrchestrator>,
        admission: DeployAdmission,
        service: impl Into<String>,
        deploy_timeout: Duration,
    ) -> Self {
        Self {
            orchestrator,
            admission,
            service: service.into(),
            deploy_timeout,
        }
    }

    pub fn orchestrator(&self) -> &Arc<dyn ServiceOrchestrator> {
        &self.orchestrator
    }

    pub async fn execute(&self, inputs: &[Artifact]) -> Result<StageOutput, StageError> {
        let manifest: Manifest = decode(input(inputs, MANIFEST_ARTIFACT)?)?;
        if manifest.is_empty() {
            return Err(StageError::artifact(MANIFEST_ARTIFACT, "manifest has no entries"));
        }
        for reference in &manifest {
            reference
                .validate()
                .map_err(|reason| StageError::artifact(MANIFEST_ARTIFACT, reason))?;
        }

        let _admission = self.admission.acquire(&self.service).await;
        info!(
            "Deploying {} component(s) to service {}",
            manifest.len(),
            self.service
        );

        let mut updates = Vec::with_capacity(manifest.len());
        for reference in &manifest {
            let request = self.orchestrator.update_service_component(
                &self.service,
                &reference.name,
                &reference.image_uri,
            );

            let update = tokio::time::timeout(self.deploy_timeout, request)
                .await
                .map_err(|_| {
                    StageError::timeout(
                        format!("update of component '{}'", reference.name),
                        self.deploy_timeout,
                    )
                })?
                .map_err(|rejection| {
                    error!(
                        "Update of {}/{} rejected: {}",
                        self.service, reference.name, rejection
                    );
                    StageError::DeployRequest {
                        component: reference.name.clone(),
                        image_uri: reference.image_uri.clone(),
                        reason: rejection.reason,
                    }
                })?;

            updates.push(update);
        }

        let result = DeploymentResult {
            service: self.service.clone(),
            updates,
        };
        Ok(StageOutput::Produced(vec![encode(DEPLOYMENT_ARTIFACT, &result)?]))
    }
}
