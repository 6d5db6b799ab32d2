//! Approval endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use conveyor_core::domain::approval::{ApprovalDecision, Decision};
use conveyor_core::dto::approval::RecordApproval;
use uuid::Uuid;

impl OrchestratorClient {
    /// Record the approval decision for a run
    ///
    /// Only the first decision for a run is stored; later ones fail with a
    /// conflict (see [`crate::ClientError::is_conflict`]).
    ///
    /// # Arguments
    /// * `run_id` - The run UUID
    /// * `req` - Actor, decision and optional comment
    ///
    /// # Returns
    /// The stored decision
    pub async fn record_approval(
        &self,
        run_id: Uuid,
        req: RecordApproval,
    ) -> Result<ApprovalDecision> {
        let url = self.url(&format!("/api/runs/{}/approval", run_id));
        let response = self.client.post(&url).json(&req).send().await?;

        self.handle_response(response).await
    }

    pub async fn approve(
        &self,
        run_id: Uuid,
        actor: &str,
        comment: Option<String>,
    ) -> Result<ApprovalDecision> {
        self.record_approval(run_id, request(actor, Decision::Approve, comment))
            .await
    }

    pub async fn reject(
        &self,
        run_id: Uuid,
        actor: &str,
        comment: Option<String>,
    ) -> Result<ApprovalDecision> {
        self.record_approval(run_id, request(actor, Decision::Reject, comment))
            .await
    }
}

fn request(actor: &str, decision: Decision, comment: Option<String>) -> RecordApproval {
    RecordApproval {
        actor: actor.to_string(),
        decision,
        comment,
    }
}
