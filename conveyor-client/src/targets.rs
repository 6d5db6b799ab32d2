//! Deployment target endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use conveyor_core::domain::target::DeploymentTarget;

impl OrchestratorClient {
    /// Get the desired state of a running service
    ///
    /// # Arguments
    /// * `service` - Service name
    pub async fn get_target(&self, service: &str) -> Result<DeploymentTarget> {
        let url = self.url(&format!("/api/targets/{}", service));
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }
}
