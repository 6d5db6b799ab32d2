//! Source stage
//!
//! Checks the triggering branch and pins the pushed revision through the
//! source-control collaborator. The resolved revision is sealed as `source.json`.

use std::sync::Arc;

use conveyor_core::domain::revision::{PushEvent, Revision};
use conveyor_core::domain::run::SOURCE_ARTIFACT;
use conveyor_core::error::StageError;
use tracing::info;

use super::{StageOutput, encode};
use crate::collaborators::SourceControl;

pub struct SourceStage {
    source: Arc<dyn SourceControl>,
    target_branch: String,
}

impl SourceStage {
    pub fn new(source: Arc<dyn SourceControl>, target_branch: impl Into<String>) -> Self {
        Self {
            source,
            target_branch: target_branch.into(),
        }
    }

    /// Refuse pushes to any branch other than the target branch
    pub fn check_trigger(&self, event: &PushEvent) -> Result<(), StageError> {
        self.check_branch(&event.branch)
    }

    pub async fn execute(&self, revision: &Revision) -> Result<StageOutput, StageError> {
        self.check_branch(&revision.branch)?;

        let resolved = self
            .source
            .resolve(revision)
            .await
            .map_err(|e| StageError::SourceResolve {
                revision: revision.id.clone(),
                reason: e.reason,
            })?;

        info!("Source stage resolved {} to {}", revision, resolved.id);
        Ok(StageOutput::Produced(vec![encode(SOURCE_ARTIFACT, &resolved)?]))
    }

    fn check_branch(&self, branch: &str) -> Result<(), StageError> {
        if branch != self.target_branch {
            return Err(StageError::BranchMismatch {
                expected: self.target_branch.clone(),
                actual: branch.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeSource;

    fn stage(source: &FakeSource) -> SourceStage {
        SourceStage::new(Arc::new(source.clone()), "main")
    }

    #[test]
    fn test_branch_mismatch() {
        let source = FakeSource::new();
        let err = stage(&source)
            .check_trigger(&PushEvent::new("dev", "abc123"))
            .unwrap_err();
        assert_eq!(
            err,
            StageError::BranchMismatch {
                expected: "main".to_string(),
                actual: "dev".to_string(),
            }
        );
        assert!(stage(&source).check_trigger(&PushEvent::new("main", "abc123")).is_ok());
    }

    #[tokio::test]
    async fn test_execute_seals_resolved_revision() {
        let source = FakeSource::new();
        let rev = Revision::new("abc123", "repo", "main");

        let output = stage(&source).execute(&rev).await.unwrap();
        let StageOutput::Produced(artifacts) = output else {
            panic!("expected artifacts");
        };
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].name, SOURCE_ARTIFACT);

        let sealed: Revision = serde_json::from_slice(&artifacts[0].content).unwrap();
        assert_eq!(sealed, rev);
        assert_eq!(source.resolved(), vec![rev]);
    }

    #[tokio::test]
    async fn test_resolve_failure() {
        let source = FakeSource::new();
        source.fail_with("unknown revision");

        let err = stage(&source)
            .execute(&Revision::new("abc123", "repo", "main"))
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::SourceResolve { ref reason, .. } if reason == "unknown revision"));
    }
}
