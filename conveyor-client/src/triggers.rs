//! Push notification endpoint

use crate::OrchestratorClient;
use crate::error::Result;
use conveyor_core::domain::revision::PushEvent;
use conveyor_core::dto::trigger::PushOutcome;

impl OrchestratorClient {
    /// Notify the orchestrator of a push
    ///
    /// # Arguments
    /// * `event` - Branch and revision that were pushed
    ///
    /// # Returns
    /// Whether a run was started or the push was ignored
    ///
    /// # Example
    /// ```no_run
    /// # use conveyor_client::OrchestratorClient;
    /// # use conveyor_core::domain::revision::PushEvent;
    /// # async fn example() -> conveyor_client::Result<()> {
    /// let client = OrchestratorClient::new("http://localhost:8080");
    /// let outcome = client.push(PushEvent::new("main", "abc123")).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn push(&self, event: PushEvent) -> Result<PushOutcome> {
        let url = self.url("/api/webhook/push");
        let response = self.client.post(&url).json(&event).send().await?;

        self.handle_response(response).await
    }
}
