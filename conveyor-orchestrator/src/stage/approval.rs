//! Approval gate
//!
//! Suspends the run until a human records a decision. The decision is stored
//! once per run; the gate itself holds no thread while waiting, the run simply
//! stays in `waitingApproval` until the next `advance`.

use std::sync::Arc;

use conveyor_core::domain::approval::{ApprovalDecision, Decision};
use conveyor_core::domain::artifact::{Artifact, NewArtifact};
use conveyor_core::domain::manifest::{MANIFEST_ARTIFACT, Manifest};
use conveyor_core::error::StageError;
use tracing::info;
use uuid::Uuid;

use super::{StageOutput, decode, input};
use crate::repository::{RepositoryError, RunRepository};

pub struct ApprovalGate {
    runs: Arc<dyn RunRepository>,
}

impl ApprovalGate {
    pub fn new(runs: Arc<dyn RunRepository>) -> Self {
        Self { runs }
    }

    /// Store the decision for a run; a second one is refused
    pub async fn record(
        &self,
        decision: ApprovalDecision,
    ) -> Result<ApprovalDecision, RepositoryError> {
        let stored = self.runs.record_approval(decision).await?;
        info!(
            "Run {} {} by {}",
            stored.run_id,
            match stored.decision {
                Decision::Approve => "approved",
                Decision::Reject => "rejected",
            },
            stored.actor
        );
        Ok(stored)
    }

    pub async fn decision_for(
        &self,
        run_id: Uuid,
    ) -> Result<Option<ApprovalDecision>, RepositoryError> {
        self.runs.find_approval(run_id).await
    }

    /// Pass the manifest through once approved
    pub fn execute(
        &self,
        inputs: &[Artifact],
        decision: Option<&ApprovalDecision>,
    ) -> Result<StageOutput, StageError> {
        let manifest_artifact = input(inputs, MANIFEST_ARTIFACT)?;

        let Some(decision) = decision else {
            return Ok(StageOutput::Suspend);
        };

        match decision.decision {
            Decision::Reject => Err(StageError::Rejected {
                actor: decision.actor.clone(),
                comment: decision.comment.clone(),
            }),
            Decision::Approve => {
                let manifest: Manifest = decode(manifest_artifact)?;
                info!(
                    "Approval gate passing {} image reference(s) for run {}",
                    manifest.len(),
                    decision.run_id
                );
                Ok(StageOutput::Produced(vec![NewArtifact {
                    name: MANIFEST_ARTIFACT.to_string(),
                    content_type: manifest_artifact.content_type.clone(),
                    content: manifest_artifact.content.clone(),
                }]))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryRunRepository;
    use chrono::Utc;
    use conveyor_core::domain::artifact::ArtifactKey;
    use conveyor_core::domain::manifest::ImageReference;
    use conveyor_core::domain::run::StageName;

    const MANIFEST: &[u8] = br#"[{"name":"app","imageUri":"registry/repo:abc123"}]"#;

    fn gate() -> ApprovalGate {
        ApprovalGate::new(Arc::new(MemoryRunRepository::new()))
    }

    fn manifest_input(run_id: Uuid) -> Vec<Artifact> {
        vec![Artifact {
            key: ArtifactKey::new(run_id, StageName::Build, MANIFEST_ARTIFACT),
            content_type: "application/json".to_string(),
            sequence: 2,
            sealed_at: Utc::now(),
            content: MANIFEST.to_vec(),
        }]
    }

    fn decision(run_id: Uuid, decision: Decision) -> ApprovalDecision {
        ApprovalDecision {
            run_id,
            actor: "alice".to_string(),
            decision,
            comment: Some("looks good".to_string()),
            decided_at: Utc::now(),
        }
    }

    #[test]
    fn test_suspends_without_decision() {
        let run_id = Uuid::new_v4();
        let outcome = gate().execute(&manifest_input(run_id), None).unwrap();
        assert_eq!(outcome, StageOutput::Suspend);
    }

    #[test]
    fn test_approval_passes_manifest_through_unchanged() {
        let run_id = Uuid::new_v4();
        let approved = decision(run_id, Decision::Approve);

        let outcome = gate()
            .execute(&manifest_input(run_id), Some(&approved))
            .unwrap();
        let StageOutput::Produced(artifacts) = outcome else {
            panic!("expected passthrough");
        };
        assert_eq!(artifacts[0].content, MANIFEST.to_vec());

        let manifest = Manifest::from_bytes(&artifacts[0].content).unwrap();
        assert_eq!(
            manifest.references(),
            &[ImageReference::new("app", "registry/repo:abc123")]
        );
    }

    #[test]
    fn test_rejection() {
        let run_id = Uuid::new_v4();
        let rejected = decision(run_id, Decision::Reject);

        let err = gate()
            .execute(&manifest_input(run_id), Some(&rejected))
            .unwrap_err();
        assert_eq!(err.to_string(), "rejected by alice: looks good");
    }

    #[tokio::test]
    async fn test_record_once() {
        let gate = gate();
        let run_id = Uuid::new_v4();

        gate.record(decision(run_id, Decision::Approve)).await.unwrap();
        let err = gate
            .record(decision(run_id, Decision::Reject))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::AlreadyDecided(_)));

        let stored = gate.decision_for(run_id).await.unwrap().unwrap();
        assert_eq!(stored.decision, Decision::Approve);
    }
}
