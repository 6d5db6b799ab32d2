//! Build stage
//!
//! Builds the resolved revision, pushes the image and seals the manifest. The
//! manifest is only produced after a successful push, so every image reference
//! it contains exists in the registry.

use std::sync::Arc;
use std::time::Duration;

use conveyor_core::domain::artifact::Artifact;
use conveyor_core::domain::manifest::{MANIFEST_ARTIFACT, Manifest, TagPolicy};
use conveyor_core::domain::revision::Revision;
use conveyor_core::domain::run::SOURCE_ARTIFACT;
use conveyor_core::error::StageError;
use tracing::{info, warn};

use super::{StageOutput, decode, encode, input};
use crate::collaborators::ImageBuilder;
use crate::config::PipelineConfig;

pub struct BuildStage {
    builder: Arc<dyn ImageBuilder>,
    registry_repository: String,
    components: Vec<String>,
    tag_policy: TagPolicy,
    build_timeout: Duration,
    push_retries: u32,
}

impl BuildStage {
    pub fn new(builder: Arc<dyn ImageBuilder>, config: &PipelineConfig) -> Self {
        Self {
            builder,
            registry_repository: config.registry_repository.clone(),
            components: config.components.clone(),
            tag_policy: config.tag_policy.clone(),
            build_timeout: config.build_timeout,
            push_retries: config.push_retries,
        }
    }

    pub async fn execute(&self, inputs: &[Artifact]) -> Result<StageOutput, StageError> {
        let revision: Revision = decode(input(inputs, SOURCE_ARTIFACT)?)?;
        let image_uri = self.tag_policy.image_uri(&self.registry_repository, &revision);

        info!("Build stage building {} as {}", revision, image_uri);

        let output = tokio::time::timeout(self.build_timeout, self.builder.build(&revision, &image_uri))
            .await
            .map_err(|_| StageError::timeout("image build", self.build_timeout))?
            .map_err(|failure| StageError::BuildFailed {
                exit_status: failure.exit_status,
                logs_ref: failure.logs_ref,
            })?;

        info!("Build of {} succeeded (logs: {})", image_uri, output.logs_ref);

        self.push(&image_uri).await?;

        let manifest = Manifest::for_components(self.components.as_slice(), &image_uri);
        Ok(StageOutput::Produced(vec![encode(MANIFEST_ARTIFACT, &manifest)?]))
    }

    /// Push with the configured retry budget; a timed out push is not retried
    async fn push(&self, image_uri: &str) -> Result<(), StageError> {
        let attempts = self.push_retries + 1;
        let mut attempt = 1;

        loop {
            let result = tokio::time::timeout(self.build_timeout, self.builder.push(image_uri))
                .await
                .map_err(|_| StageError::timeout("registry push", self.build_timeout))?;

            match result {
                Ok(()) => {
                    info!("Pushed {} (attempt {}/{})", image_uri, attempt, attempts);
                    return Ok(());
                }
                Err(failure) if attempt < attempts => {
                    warn!(
                        "Push of {} failed (attempt {}/{}): {}; retrying",
                        image_uri, attempt, attempts, failure
                    );
                    attempt += 1;
                }
                Err(failure) => {
                    return Err(StageError::RegistryPush {
                        image_uri: image_uri.to_string(),
                        attempts,
                        reason: failure.to_string(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::PushFailure;
    use crate::testing::{BuilderCall, FakeBuilder};
    use chrono::Utc;
    use conveyor_core::domain::artifact::ArtifactKey;
    use conveyor_core::domain::run::StageName;
    use uuid::Uuid;

    fn config(tag_policy: TagPolicy) -> PipelineConfig {
        PipelineConfig::new("repo", "registry/repo", "app", tag_policy)
            .with_components(vec!["app".to_string(), "worker".to_string()])
    }

    fn source_input(revision_id: &str) -> Vec<Artifact> {
        let revision = Revision::new(revision_id, "repo", "main");
        vec![Artifact {
            key: ArtifactKey::new(Uuid::new_v4(), StageName::Source, SOURCE_ARTIFACT),
            content_type: "application/json".to_string(),
            sequence: 1,
            sealed_at: Utc::now(),
            content: serde_json::to_vec(&revision).unwrap(),
        }]
    }

    fn manifest_of(output: StageOutput) -> Manifest {
        match output {
            StageOutput::Produced(artifacts) => {
                assert_eq!(artifacts[0].name, MANIFEST_ARTIFACT);
                Manifest::from_bytes(&artifacts[0].content).unwrap()
            }
            StageOutput::Suspend => panic!("build stage never suspends"),
        }
    }

    #[tokio::test]
    async fn test_revision_tag_policy() {
        let builder = FakeBuilder::new();
        let stage = BuildStage::new(Arc::new(builder.clone()), &config(TagPolicy::Revision));

        let manifest = manifest_of(stage.execute(&source_input("abc123")).await.unwrap());
        assert_eq!(manifest.len(), 2);
        assert!(manifest.iter().all(|r| r.image_uri == "registry/repo:abc123"));
        assert_eq!(
            builder.calls(),
            vec![
                BuilderCall::Build {
                    revision_id: "abc123".to_string(),
                    image_uri: "registry/repo:abc123".to_string(),
                },
                BuilderCall::Push {
                    image_uri: "registry/repo:abc123".to_string(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_fixed_tag_policy() {
        let builder = FakeBuilder::new();
        let stage = BuildStage::new(
            Arc::new(builder),
            &config(TagPolicy::Fixed("latest".to_string())),
        );

        let manifest = manifest_of(stage.execute(&source_input("abc123")).await.unwrap());
        assert!(manifest.iter().all(|r| r.image_uri == "registry/repo:latest"));
    }

    #[tokio::test]
    async fn test_build_failure_skips_push() {
        let builder = FakeBuilder::new();
        builder.fail_builds(2);
        let stage = BuildStage::new(Arc::new(builder.clone()), &config(TagPolicy::Revision));

        let err = stage.execute(&source_input("abc123")).await.unwrap_err();
        assert_eq!(
            err,
            StageError::BuildFailed {
                exit_status: Some(2),
                logs_ref: "fake://build.log".to_string(),
            }
        );
        assert_eq!(builder.push_attempts(), 0);
    }

    #[tokio::test]
    async fn test_push_is_retried_once() {
        let builder = FakeBuilder::new();
        builder.fail_pushes(1, PushFailure::Network("connection reset".to_string()));
        let stage = BuildStage::new(Arc::new(builder.clone()), &config(TagPolicy::Revision));

        assert!(stage.execute(&source_input("abc123")).await.is_ok());
        assert_eq!(builder.push_attempts(), 2);
    }

    #[tokio::test]
    async fn test_push_failing_twice_fails_stage() {
        let builder = FakeBuilder::new();
        builder.fail_pushes(2, PushFailure::Auth("unauthorized".to_string()));
        let stage = BuildStage::new(Arc::new(builder.clone()), &config(TagPolicy::Revision));

        let err = stage.execute(&source_input("abc123")).await.unwrap_err();
        match err {
            StageError::RegistryPush { attempts, reason, .. } => {
                assert_eq!(attempts, 2);
                assert!(reason.contains("unauthorized"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(builder.push_attempts(), 2);
    }

    #[tokio::test]
    async fn test_build_timeout() {
        let builder = FakeBuilder::new();
        builder.delay_builds(Duration::from_millis(200));
        let config = config(TagPolicy::Revision)
            .with_timeouts(Duration::from_millis(20), Duration::from_secs(1));
        let stage = BuildStage::new(Arc::new(builder.clone()), &config);

        let err = stage.execute(&source_input("abc123")).await.unwrap_err();
        assert!(matches!(err, StageError::Timeout { .. }));
        assert_eq!(builder.push_attempts(), 0);
    }

    #[tokio::test]
    async fn test_missing_source_artifact() {
        let stage = BuildStage::new(Arc::new(FakeBuilder::new()), &config(TagPolicy::Revision));
        let err = stage.execute(&[]).await.unwrap_err();
        assert!(matches!(err, StageError::Artifact { .. }));
    }
}
