//! End-to-end pipeline runs against recording collaborators

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conveyor_core::domain::approval::ApprovalDecision;
use conveyor_core::domain::approval::Decision;
use conveyor_core::domain::manifest::{MANIFEST_ARTIFACT, Manifest, TagPolicy};
use conveyor_core::domain::revision::{PushEvent, Revision};
use conveyor_core::domain::run::{
    PipelineRun, RunStatus, RunTransition, StageName, StageStatus,
};
use conveyor_core::domain::target::DeploymentTarget;
use conveyor_core::dto::approval::RecordApproval;
use conveyor_core::dto::run::StageResult;
use conveyor_core::dto::trigger::PushOutcome;
use conveyor_core::error::ErrorKind;
use conveyor_orchestrator::artifact::MemoryArtifactStore;
use conveyor_orchestrator::collaborators::PushFailure;
use conveyor_orchestrator::config::PipelineConfig;
use conveyor_orchestrator::repository::{MemoryRunRepository, RepositoryError, RunRepository};
use conveyor_orchestrator::service::{Collaborators, PipelineController, PipelineError, drive};
use conveyor_orchestrator::testing::{
    BuilderCall, FakeBuilder, FakeSource, RecordingOrchestrator, RequestPhase,
};
use uuid::Uuid;

struct Harness {
    controller: Arc<PipelineController>,
    source: FakeSource,
    builder: FakeBuilder,
    orchestrator: RecordingOrchestrator,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(config(&["app"]))
    }

    fn with_config(config: PipelineConfig) -> Self {
        Self::with_runs(config, Arc::new(MemoryRunRepository::new()))
    }

    fn with_runs(config: PipelineConfig, runs: Arc<dyn RunRepository>) -> Self {
        let target = config
            .components
            .iter()
            .fold(DeploymentTarget::new("web"), |target, name| {
                target.with_component(name, "registry/repo:old", 3)
            });

        let source = FakeSource::new();
        let builder = FakeBuilder::new();
        let orchestrator = RecordingOrchestrator::new(target);

        let controller = Arc::new(PipelineController::new(
            config,
            runs,
            Arc::new(MemoryArtifactStore::new()),
            Collaborators {
                source: Arc::new(source.clone()),
                builder: Arc::new(builder.clone()),
                orchestrator: Arc::new(orchestrator.clone()),
            },
        ));

        Self {
            controller,
            source,
            builder,
            orchestrator,
        }
    }

    async fn start(&self, revision_id: &str) -> PipelineRun {
        self.controller
            .start_run(Revision::new(revision_id, "repo", "main"))
            .await
            .unwrap()
    }

    async fn decide(&self, run_id: Uuid, actor: &str, decision: Decision) {
        self.controller
            .record_approval(
                run_id,
                RecordApproval {
                    actor: actor.to_string(),
                    decision,
                    comment: None,
                },
            )
            .await
            .unwrap();
    }

    async fn status(&self, run_id: Uuid) -> PipelineRun {
        self.controller.get_status(run_id).await.unwrap()
    }

    async fn artifact_names(&self, run_id: Uuid) -> Vec<String> {
        self.controller
            .list_artifacts(run_id)
            .await
            .unwrap()
            .into_iter()
            .map(|artifact| artifact.key.name)
            .collect()
    }
}

fn config(components: &[&str]) -> PipelineConfig {
    PipelineConfig::new("repo", "registry/repo", "web", TagPolicy::Revision)
        .with_components(components.iter().map(|c| c.to_string()).collect())
}

/// Run store that stalls suspensions and fails completions on request
#[derive(Default)]
struct ScriptedRuns {
    inner: MemoryRunRepository,
    suspend_delay: Duration,
    failing_completions: AtomicUsize,
}

impl ScriptedRuns {
    fn stalling_suspend(delay: Duration) -> Self {
        Self {
            suspend_delay: delay,
            ..Default::default()
        }
    }

    fn failing_completions(count: usize) -> Self {
        Self {
            failing_completions: AtomicUsize::new(count),
            ..Default::default()
        }
    }
}

#[async_trait]
impl RunRepository for ScriptedRuns {
    async fn insert_if_no_active(&self, run: PipelineRun) -> Result<PipelineRun, RepositoryError> {
        self.inner.insert_if_no_active(run).await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<PipelineRun>, RepositoryError> {
        self.inner.find_by_id(id).await
    }

    async fn list_all(&self) -> Result<Vec<PipelineRun>, RepositoryError> {
        self.inner.list_all().await
    }

    async fn list_waiting_approval(&self) -> Result<Vec<PipelineRun>, RepositoryError> {
        self.inner.list_waiting_approval().await
    }

    async fn apply(
        &self,
        id: Uuid,
        transition: &RunTransition,
        now: DateTime<Utc>,
    ) -> Result<PipelineRun, RepositoryError> {
        match transition {
            RunTransition::SuspendForApproval => tokio::time::sleep(self.suspend_delay).await,
            RunTransition::CompleteStage(_) => {
                let failed = self
                    .failing_completions
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
                if failed {
                    return Err(RepositoryError::Corrupt("disk full".to_string()));
                }
            }
            _ => {}
        }
        self.inner.apply(id, transition, now).await
    }

    async fn record_approval(
        &self,
        decision: ApprovalDecision,
    ) -> Result<ApprovalDecision, RepositoryError> {
        self.inner.record_approval(decision).await
    }

    async fn find_approval(
        &self,
        run_id: Uuid,
    ) -> Result<Option<ApprovalDecision>, RepositoryError> {
        self.inner.find_approval(run_id).await
    }
}

/// Poll until `check` holds; panics after a second
async fn wait_for(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn test_approved_run_deploys_exact_image() {
    let harness = Harness::new();
    let run = harness.start("abc123").await;

    let outcome = drive(&harness.controller, run.id).await.unwrap();
    assert_eq!(outcome, StageResult::WaitingApproval);
    assert!(harness.orchestrator.requests().is_empty());

    harness.decide(run.id, "alice", Decision::Approve).await;
    let outcome = drive(&harness.controller, run.id).await.unwrap();
    assert_eq!(outcome, StageResult::Succeeded);

    let requests = harness.orchestrator.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].component, "app");
    assert_eq!(requests[0].image_uri, "registry/repo:abc123");

    let target = harness.controller.describe_target("web").await.unwrap();
    assert_eq!(target.desired_image("app"), Some("registry/repo:abc123"));
    assert_eq!(target.components["app"].replicas, 3);

    let run = harness.status(run.id).await;
    assert_eq!(run.status, RunStatus::Succeeded);
    assert!(run.failure.is_none());
    assert_eq!(
        harness.artifact_names(run.id).await,
        vec![
            "source.json",
            MANIFEST_ARTIFACT,
            MANIFEST_ARTIFACT,
            "deployment.json"
        ]
    );
}

#[tokio::test]
async fn test_stages_run_in_order() {
    let harness = Harness::new();
    let run = harness.start("abc123").await;
    harness.decide(run.id, "alice", Decision::Approve).await;

    let outcome = drive(&harness.controller, run.id).await.unwrap();
    assert_eq!(outcome, StageResult::Succeeded);

    let run = harness.status(run.id).await;
    let order: Vec<_> = run.stages.iter().map(|record| record.name).collect();
    assert_eq!(
        order,
        vec![
            StageName::Source,
            StageName::Build,
            StageName::Approve,
            StageName::Deploy
        ]
    );

    for pair in run.stages.windows(2) {
        let previous = &pair[0];
        let next = &pair[1];
        assert_eq!(previous.status, StageStatus::Succeeded);
        assert!(previous.completed_at.unwrap() <= next.started_at.unwrap());
    }

    assert_eq!(harness.source.resolved().len(), 1);
    assert_eq!(
        harness.builder.calls(),
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
async fn test_push_on_other_branch_never_creates_run() {
    let harness = Harness::new();

    let outcome = harness
        .controller
        .handle_push(PushEvent::new("dev", "abc123"))
        .await
        .unwrap();

    assert!(matches!(outcome, PushOutcome::Ignored { .. }));
    assert!(harness.controller.list_runs().await.unwrap().is_empty());
    assert!(harness.source.resolved().is_empty());
}

#[tokio::test]
async fn test_rejected_run_never_deploys() {
    let harness = Harness::new();
    let run = harness.start("abc123").await;

    drive(&harness.controller, run.id).await.unwrap();
    harness.decide(run.id, "bob", Decision::Reject).await;

    let outcome = drive(&harness.controller, run.id).await.unwrap();
    assert!(matches!(outcome, StageResult::Rejected { .. }));

    let run = harness.status(run.id).await;
    assert_eq!(run.status, RunStatus::Rejected);
    assert_eq!(run.failure.unwrap().kind, ErrorKind::Rejected);
    assert!(harness.orchestrator.events().is_empty());

    let target = harness.controller.describe_target("web").await.unwrap();
    assert_eq!(target.desired_image("app"), Some("registry/repo:old"));
}

#[tokio::test]
async fn test_second_decision_is_refused() {
    let harness = Harness::new();
    let run = harness.start("abc123").await;
    drive(&harness.controller, run.id).await.unwrap();

    harness.decide(run.id, "alice", Decision::Approve).await;

    let err = harness
        .controller
        .record_approval(
            run.id,
            RecordApproval {
                actor: "mallory".to_string(),
                decision: Decision::Reject,
                comment: Some("changed my mind".to_string()),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::AlreadyDecided {
            decision: Decision::Approve,
            ..
        }
    ));
    assert_eq!(err.kind(), Some(ErrorKind::AlreadyDecided));

    let stored = harness.controller.get_approval(run.id).await.unwrap().unwrap();
    assert_eq!(stored.actor, "alice");
    assert_eq!(stored.decision, Decision::Approve);
    assert!(stored.comment.is_none());
}

#[tokio::test]
async fn test_push_failing_twice_fails_run_without_manifest() {
    let harness = Harness::new();
    harness
        .builder
        .fail_pushes(2, PushFailure::Network("connection reset".to_string()));
    let run = harness.start("abc123").await;

    let outcome = drive(&harness.controller, run.id).await.unwrap();
    assert!(matches!(
        outcome,
        StageResult::Failed {
            stage: StageName::Build,
            kind: ErrorKind::RegistryPush,
            ..
        }
    ));
    assert_eq!(harness.builder.push_attempts(), 2);

    let run = harness.status(run.id).await;
    assert_eq!(run.status, RunStatus::Failed);
    let failure = run.failure.unwrap();
    assert_eq!(failure.kind, ErrorKind::RegistryPush);
    assert!(failure.cause.contains("connection reset"));
    assert_eq!(harness.artifact_names(run.id).await, vec!["source.json"]);
}

#[tokio::test]
async fn test_single_push_failure_is_retried() {
    let harness = Harness::new();
    harness
        .builder
        .fail_pushes(1, PushFailure::Network("timeout".to_string()));
    let run = harness.start("abc123").await;

    let outcome = drive(&harness.controller, run.id).await.unwrap();
    assert_eq!(outcome, StageResult::WaitingApproval);
    assert_eq!(harness.builder.push_attempts(), 2);
}

#[tokio::test]
async fn test_build_failure_fails_run() {
    let harness = Harness::new();
    harness.builder.fail_builds(2);
    let run = harness.start("abc123").await;

    drive(&harness.controller, run.id).await.unwrap();

    let run = harness.status(run.id).await;
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.failure.unwrap().kind, ErrorKind::BuildFailed);
    assert_eq!(harness.builder.push_attempts(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_runs_never_interleave_updates() {
    let harness = Harness::with_config(config(&["app", "worker"]));
    harness.orchestrator.delay_requests(Duration::from_millis(20));

    let first = harness.start("aaa111").await;
    let second = harness.start("bbb222").await;
    harness.decide(first.id, "alice", Decision::Approve).await;
    harness.decide(second.id, "alice", Decision::Approve).await;

    let a = tokio::spawn({
        let controller = harness.controller.clone();
        async move { drive(&controller, first.id).await }
    });
    let b = tokio::spawn({
        let controller = harness.controller.clone();
        async move { drive(&controller, second.id).await }
    });
    assert_eq!(a.await.unwrap().unwrap(), StageResult::Succeeded);
    assert_eq!(b.await.unwrap().unwrap(), StageResult::Succeeded);

    let events = harness.orchestrator.events();
    assert_eq!(events.len(), 8);

    // Every request ends before the next one begins
    for pair in events.chunks(2) {
        assert_eq!(pair[0].phase, RequestPhase::Begin);
        assert_eq!(pair[1].phase, RequestPhase::End);
        assert_eq!(pair[0].image_uri, pair[1].image_uri);
    }

    // Both updates of one run happen back to back
    for run_events in events.chunks(4) {
        assert!(run_events.iter().all(|e| e.image_uri == run_events[0].image_uri));
    }
}

#[tokio::test]
async fn test_duplicate_run_for_active_revision() {
    let harness = Harness::new();
    let first = harness.start("abc123").await;

    let err = harness
        .controller
        .start_run(Revision::new("abc123", "repo", "main"))
        .await
        .unwrap_err();
    match err {
        PipelineError::DuplicateRun {
            ref revision_id,
            existing,
        } => {
            assert_eq!(revision_id, "abc123");
            assert_eq!(existing, first.id);
        }
        ref other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.kind(), Some(ErrorKind::DuplicateRun));
    assert_eq!(harness.controller.list_runs().await.unwrap().len(), 1);

    harness.controller.cancel(first.id).await.unwrap();

    let second = harness.start("abc123").await;
    assert_ne!(second.id, first.id);
    assert_eq!(harness.controller.list_runs().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_cancel_while_waiting_for_approval() {
    let harness = Harness::new();
    let run = harness.start("abc123").await;
    drive(&harness.controller, run.id).await.unwrap();

    let cancelled = harness.controller.cancel(run.id).await.unwrap();
    assert_eq!(cancelled.status, RunStatus::Cancelled);
    assert_eq!(cancelled.failure.unwrap().kind, ErrorKind::Cancelled);

    let err = harness
        .controller
        .record_approval(
            run.id,
            RecordApproval {
                actor: "alice".to_string(),
                decision: Decision::Approve,
                comment: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidState(_)));
    assert!(harness.orchestrator.events().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_during_build_discards_result() {
    let harness = Harness::new();
    harness.builder.delay_builds(Duration::from_millis(100));
    let run = harness.start("abc123").await;

    let advancing = tokio::spawn({
        let controller = harness.controller.clone();
        async move { drive(&controller, run.id).await }
    });

    let builder = harness.builder.clone();
    wait_for(|| !builder.calls().is_empty()).await;

    let cancelled = harness.controller.cancel(run.id).await.unwrap();
    assert_eq!(cancelled.status, RunStatus::Cancelled);

    let outcome = advancing.await.unwrap().unwrap();
    assert_eq!(
        outcome,
        StageResult::Terminal {
            status: RunStatus::Cancelled
        }
    );

    let run = harness.status(run.id).await;
    assert_eq!(run.status, RunStatus::Cancelled);
    assert_eq!(harness.artifact_names(run.id).await, vec!["source.json"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_after_deploy_entered_is_refused() {
    let harness = Harness::new();
    harness.orchestrator.delay_requests(Duration::from_millis(100));
    let run = harness.start("abc123").await;
    harness.decide(run.id, "alice", Decision::Approve).await;

    let driving = tokio::spawn({
        let controller = harness.controller.clone();
        async move { drive(&controller, run.id).await }
    });

    let orchestrator = harness.orchestrator.clone();
    wait_for(|| !orchestrator.requests().is_empty()).await;

    let err = harness.controller.cancel(run.id).await.unwrap_err();
    assert!(matches!(err, PipelineError::InvalidState(_)));

    assert_eq!(driving.await.unwrap().unwrap(), StageResult::Succeeded);
    assert_eq!(harness.status(run.id).await.status, RunStatus::Succeeded);
}

#[tokio::test]
async fn test_approval_timeout_fails_run() {
    let harness = Harness::with_config(
        config(&["app"]).with_approval_timeout(Duration::from_secs(60)),
    );
    let waiting = harness.start("abc123").await;
    let decided = harness.start("def456").await;
    drive(&harness.controller, waiting.id).await.unwrap();
    drive(&harness.controller, decided.id).await.unwrap();
    harness.decide(decided.id, "alice", Decision::Approve).await;

    // Not expired yet
    let expired = harness.controller.expire_approvals(Utc::now()).await.unwrap();
    assert!(expired.is_empty());

    let later = Utc::now() + chrono::Duration::minutes(5);
    let expired = harness.controller.expire_approvals(later).await.unwrap();
    assert_eq!(expired, vec![waiting.id]);

    let run = harness.status(waiting.id).await;
    assert_eq!(run.status, RunStatus::Failed);
    let failure = run.failure.unwrap();
    assert_eq!(failure.stage, StageName::Approve);
    assert_eq!(failure.kind, ErrorKind::Timeout);

    // A decided run is left for the driver
    assert_eq!(
        harness.status(decided.id).await.status,
        RunStatus::WaitingApproval
    );
    let outcome = drive(&harness.controller, decided.id).await.unwrap();
    assert_eq!(outcome, StageResult::Succeeded);
}

#[tokio::test]
async fn test_manifest_lists_every_component() {
    let harness = Harness::with_config(config(&["app", "worker"]));
    let run = harness.start("abc123").await;
    drive(&harness.controller, run.id).await.unwrap();

    let key = conveyor_core::domain::artifact::ArtifactKey::new(
        run.id,
        StageName::Build,
        MANIFEST_ARTIFACT,
    );
    let artifact = harness.controller.get_artifact(&key).await.unwrap();
    let manifest = Manifest::from_bytes(&artifact.content).unwrap();

    let names: Vec<_> = manifest.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["app", "worker"]);
    assert!(manifest.iter().all(|r| r.image_uri == "registry/repo:abc123"));
}

#[tokio::test]
async fn test_decision_during_suspension_resumes_run() {
    let runs = ScriptedRuns::stalling_suspend(Duration::from_millis(150));
    let harness = Harness::with_runs(config(&["app"]), Arc::new(runs));
    let run = harness.start("abc123").await;

    let driver = {
        let controller = harness.controller.clone();
        tokio::spawn(async move { drive(&controller, run.id).await })
    };

    // The gate is claimed and its suspension is stalled in the store
    let mut gate_running = false;
    for _ in 0..100 {
        let status = harness.status(run.id).await.stage_status(StageName::Approve);
        if status == StageStatus::Running {
            gate_running = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(gate_running);

    // What the approval endpoint does: record, then drive
    harness.decide(run.id, "alice", Decision::Approve).await;
    let outcome = drive(&harness.controller, run.id).await.unwrap();
    assert_eq!(
        outcome,
        StageResult::InProgress {
            stage: StageName::Approve
        }
    );

    let outcome = driver.await.unwrap().unwrap();
    assert_eq!(outcome, StageResult::Succeeded);
    assert_eq!(harness.status(run.id).await.status, RunStatus::Succeeded);
    assert_eq!(harness.orchestrator.requests().len(), 1);
}

#[tokio::test]
async fn test_store_failure_after_claim_fails_stage() {
    let runs = ScriptedRuns::failing_completions(1);
    let harness = Harness::with_runs(config(&["app"]), Arc::new(runs));
    let run = harness.start("abc123").await;

    let err = harness.controller.advance(run.id).await.unwrap_err();
    assert!(matches!(err, PipelineError::Repository(_)));

    let run = harness.status(run.id).await;
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.stage_status(StageName::Source), StageStatus::Failed);
    let failure = run.failure.unwrap();
    assert_eq!(failure.stage, StageName::Source);
    assert_eq!(failure.kind, ErrorKind::Artifact);
    assert!(failure.cause.contains("disk full"));
}
