//! Pipeline Controller
//!
//! Sequences Source → Build → Approve → Deploy for every run, moves artifacts
//! between stages and records run state. Each `advance` call executes at most
//! one stage. A stage only runs after this controller won the atomic claim on
//! it, so concurrent callers never execute the same stage twice.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use conveyor_core::domain::approval::{ApprovalDecision, Decision};
use conveyor_core::domain::artifact::{Artifact, ArtifactKey};
use conveyor_core::domain::revision::{PushEvent, Revision, normalize_revision_id};
use conveyor_core::domain::run::{PipelineRun, RunStatus, RunTransition, StageName, StageStatus};
use conveyor_core::domain::target::DeploymentTarget;
use conveyor_core::dto::approval::RecordApproval;
use conveyor_core::dto::run::{AdvanceResponse, StageResult};
use conveyor_core::dto::trigger::PushOutcome;
use conveyor_core::error::{ErrorKind, StageError};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::admission::DeployAdmission;
use crate::artifact::{ArtifactError, ArtifactStore};
use crate::collaborators::{ImageBuilder, ServiceOrchestrator, SourceControl};
use crate::config::PipelineConfig;
use crate::repository::{RepositoryError, RunRepository};
use crate::stage::{ApprovalGate, BuildStage, DeployStage, SourceStage, StageOutput};

/// Service error type
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Run not found: {0}")]
    RunNotFound(Uuid),

    #[error("Artifact not found: {0}")]
    ArtifactNotFound(ArtifactKey),

    #[error("Deployment target not found: {0}")]
    TargetNotFound(String),

    #[error("Revision {revision_id} already has an active run ({existing})")]
    DuplicateRun { revision_id: String, existing: Uuid },

    #[error("Run {run_id} already has a recorded decision ({decision})")]
    AlreadyDecided { run_id: Uuid, decision: Decision },

    #[error("{0}")]
    InvalidState(String),

    #[error("{0}")]
    Validation(String),

    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    #[error(transparent)]
    Repository(RepositoryError),

    #[error(transparent)]
    Artifact(ArtifactError),
}

impl PipelineError {
    /// Error kind for caller misuse, if this is one
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            PipelineError::DuplicateRun { .. } => Some(ErrorKind::DuplicateRun),
            PipelineError::AlreadyDecided { .. } => Some(ErrorKind::AlreadyDecided),
            _ => None,
        }
    }
}

impl From<RepositoryError> for PipelineError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(id) => PipelineError::RunNotFound(id),
            RepositoryError::ActiveRunExists {
                revision_id,
                existing,
            } => PipelineError::DuplicateRun {
                revision_id,
                existing,
            },
            RepositoryError::AlreadyDecided(stored) => PipelineError::AlreadyDecided {
                run_id: stored.run_id,
                decision: stored.decision,
            },
            RepositoryError::Refused(refusal) => PipelineError::InvalidState(refusal.to_string()),
            other => PipelineError::Repository(other),
        }
    }
}

impl From<ArtifactError> for PipelineError {
    fn from(err: ArtifactError) -> Self {
        match err {
            ArtifactError::NotFound(key) => PipelineError::ArtifactNotFound(key),
            other => PipelineError::Artifact(other),
        }
    }
}

/// The external systems a pipeline talks to
pub struct Collaborators {
    pub source: Arc<dyn SourceControl>,
    pub builder: Arc<dyn ImageBuilder>,
    pub orchestrator: Arc<dyn ServiceOrchestrator>,
}

pub struct PipelineController {
    config: PipelineConfig,
    runs: Arc<dyn RunRepository>,
    artifacts: Arc<dyn ArtifactStore>,
    source: SourceStage,
    build: BuildStage,
    approval: ApprovalGate,
    deploy: DeployStage,
}

impl PipelineController {
    pub fn new(
        config: PipelineConfig,
        runs: Arc<dyn RunRepository>,
        artifacts: Arc<dyn ArtifactStore>,
        collaborators: Collaborators,
    ) -> Self {
        Self::with_admission(config, runs, artifacts, collaborators, DeployAdmission::new())
    }

    /// Create a controller sharing deploy admission with other pipelines
    pub fn with_admission(
        config: PipelineConfig,
        runs: Arc<dyn RunRepository>,
        artifacts: Arc<dyn ArtifactStore>,
        collaborators: Collaborators,
        admission: DeployAdmission,
    ) -> Self {
        Self {
            source: SourceStage::new(collaborators.source, config.target_branch.clone()),
            build: BuildStage::new(collaborators.builder, &config),
            approval: ApprovalGate::new(runs.clone()),
            deploy: DeployStage::new(
                collaborators.orchestrator,
                admission,
                config.service.clone(),
                config.deploy_timeout,
            ),
            config,
            runs,
            artifacts,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    // =============================================================================
    // Triggers
    // =============================================================================

    /// Start a run for a push on the target branch; other branches are ignored
    pub async fn handle_push(&self, event: PushEvent) -> Result<PushOutcome, PipelineError> {
        if event.revision_id.trim().is_empty() {
            return Err(PipelineError::Validation(
                "revision_id cannot be empty".to_string(),
            ));
        }

        if let Err(mismatch) = self.source.check_trigger(&event) {
            info!("Ignoring push: {}", mismatch);
            return Ok(PushOutcome::Ignored {
                branch: event.branch,
            });
        }

        let revision = event.into_revision(&self.config.source_repository);
        let run = self.start_run(revision).await?;

        Ok(PushOutcome::Started { run_id: run.id })
    }

    /// Create a pending run for `revision`
    ///
    /// The id is normalized first so that the active-run check compares the
    /// same form the source stage later resolves.
    pub async fn start_run(&self, revision: Revision) -> Result<PipelineRun, PipelineError> {
        let id = normalize_revision_id(&revision.id).map_err(PipelineError::Validation)?;
        let run = PipelineRun::new(revision.resolved(id), Utc::now());
        let run = self.runs.insert_if_no_active(run).await?;

        info!(run_id = %run.id, revision = %run.revision, "Pipeline run created");
        Ok(run)
    }

    // =============================================================================
    // Advancing
    // =============================================================================

    /// Execute the current stage of a run, if it can run now
    pub async fn advance(&self, run_id: Uuid) -> Result<AdvanceResponse, PipelineError> {
        loop {
            let run = self.get_status(run_id).await?;
            if run.is_terminal() {
                return Ok(observe(run));
            }

            let stage = run.current_stage;
            let decision = match run.stage_status(stage) {
                StageStatus::Running => return Ok(observe(run)),
                StageStatus::Pending | StageStatus::WaitingApproval
                    if stage == StageName::Approve =>
                {
                    let decision = self.approval.decision_for(run_id).await?;
                    if decision.is_none() && run.status == RunStatus::WaitingApproval {
                        return Ok(observe(run));
                    }
                    decision
                }
                _ => None,
            };

            let run = match self
                .runs
                .apply(run_id, &RunTransition::ClaimStage(stage), Utc::now())
                .await
            {
                Ok(run) => run,
                Err(RepositoryError::Refused(refusal)) => {
                    // Someone else moved the run since we read it
                    debug!("Claim refused, re-reading run: {}", refusal);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            info!(run_id = %run_id, stage = %stage, "Stage started");

            let result = match self.load_inputs(run_id, stage).await {
                Ok(inputs) => self.execute(&run, stage, &inputs, decision.as_ref()).await,
                Err(e) => Err(e),
            };

            let response = match self.settle(run_id, stage, result).await {
                Ok(response) => response,
                Err(e) => {
                    self.release_claim(run_id, stage, &e).await;
                    return Err(e);
                }
            };

            // A decision recorded while the gate was suspending saw a running
            // stage and left the run alone.
            if matches!(response.outcome, StageResult::WaitingApproval)
                && self.approval.decision_for(run_id).await?.is_some()
            {
                debug!(run_id = %run_id, "Decision arrived during suspension, resuming");
                continue;
            }

            return Ok(response);
        }
    }

    /// Fail a claimed stage whose result could not be recorded
    ///
    /// Best effort: the store that just failed may refuse this too.
    async fn release_claim(&self, run_id: Uuid, stage: StageName, error: &PipelineError) {
        let transition = RunTransition::FailStage {
            stage,
            kind: ErrorKind::Artifact,
            cause: format!("could not record stage result: {}", error),
        };

        match self.runs.apply(run_id, &transition, Utc::now()).await {
            Ok(_) => warn!(run_id = %run_id, stage = %stage, "Stage failed: {}", error),
            Err(e) => warn!(
                run_id = %run_id,
                stage = %stage,
                "Could not release stage after '{}': {}",
                error,
                e
            ),
        }
    }

    async fn execute(
        &self,
        run: &PipelineRun,
        stage: StageName,
        inputs: &[Artifact],
        decision: Option<&ApprovalDecision>,
    ) -> Result<StageOutput, StageError> {
        match stage {
            StageName::Source => self.source.execute(&run.revision).await,
            StageName::Build => self.build.execute(inputs).await,
            StageName::Approve => self.approval.execute(inputs, decision),
            StageName::Deploy => self.deploy.execute(inputs).await,
        }
    }

    /// Read the artifacts `stage` declares as inputs
    async fn load_inputs(&self, run_id: Uuid, stage: StageName) -> Result<Vec<Artifact>, StageError> {
        let mut inputs = Vec::with_capacity(stage.inputs().len());

        for (producer, name) in stage.inputs() {
            let key = ArtifactKey::new(run_id, *producer, *name);
            let artifact = self
                .artifacts
                .get(&key)
                .await
                .map_err(|e| StageError::artifact(*name, e))?;
            inputs.push(artifact);
        }

        Ok(inputs)
    }

    /// Turn a stage result into artifacts and a run transition
    async fn settle(
        &self,
        run_id: Uuid,
        stage: StageName,
        result: Result<StageOutput, StageError>,
    ) -> Result<AdvanceResponse, PipelineError> {
        match result {
            Ok(StageOutput::Produced(artifacts)) => {
                let current = self.get_status(run_id).await?;
                if current.is_terminal() {
                    warn!(
                        run_id = %run_id,
                        stage = %stage,
                        "Run finished while the stage was executing; discarding its result"
                    );
                    return Ok(observe(current));
                }

                for artifact in artifacts {
                    let name = artifact.name.clone();
                    if let Err(e) = self.artifacts.seal(run_id, stage, artifact).await {
                        return self.fail(run_id, stage, StageError::artifact(name, e)).await;
                    }
                }

                let Some(run) = self
                    .transition(run_id, RunTransition::CompleteStage(stage))
                    .await?
                else {
                    return self.observe_current(run_id).await;
                };

                info!(run_id = %run_id, stage = %stage, "Stage succeeded");

                let outcome = match stage.next() {
                    Some(next) => StageResult::Continue {
                        completed: stage,
                        next,
                    },
                    None => {
                        info!(run_id = %run_id, "Pipeline run succeeded");
                        StageResult::Succeeded
                    }
                };
                Ok(AdvanceResponse { outcome, run })
            }
            Ok(StageOutput::Suspend) => {
                let Some(run) = self
                    .transition(run_id, RunTransition::SuspendForApproval)
                    .await?
                else {
                    return self.observe_current(run_id).await;
                };

                info!(run_id = %run_id, "Run waiting for approval");
                Ok(AdvanceResponse {
                    outcome: StageResult::WaitingApproval,
                    run,
                })
            }
            Err(e @ StageError::Rejected { .. }) => {
                let cause = e.to_string();
                let Some(run) = self
                    .transition(run_id, RunTransition::Reject { cause: cause.clone() })
                    .await?
                else {
                    return self.observe_current(run_id).await;
                };

                info!(run_id = %run_id, "Run {}", cause);
                Ok(AdvanceResponse {
                    outcome: StageResult::Rejected { cause },
                    run,
                })
            }
            Err(e) => self.fail(run_id, stage, e).await,
        }
    }

    async fn fail(
        &self,
        run_id: Uuid,
        stage: StageName,
        error: StageError,
    ) -> Result<AdvanceResponse, PipelineError> {
        let kind = error.kind();
        let cause = error.to_string();
        let transition = RunTransition::FailStage {
            stage,
            kind,
            cause: cause.clone(),
        };
        let Some(run) = self.transition(run_id, transition).await? else {
            return self.observe_current(run_id).await;
        };

        warn!(run_id = %run_id, stage = %stage, kind = %kind, "Stage failed: {}", cause);
        Ok(AdvanceResponse {
            outcome: StageResult::Failed { stage, kind, cause },
            run,
        })
    }

    /// Apply a transition; `None` when the run moved on and refused it
    async fn transition(
        &self,
        run_id: Uuid,
        transition: RunTransition,
    ) -> Result<Option<PipelineRun>, PipelineError> {
        match self.runs.apply(run_id, &transition, Utc::now()).await {
            Ok(run) => Ok(Some(run)),
            Err(RepositoryError::Refused(refusal)) => {
                warn!("Discarding stage result: {}", refusal);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn observe_current(&self, run_id: Uuid) -> Result<AdvanceResponse, PipelineError> {
        Ok(observe(self.get_status(run_id).await?))
    }

    // =============================================================================
    // Queries
    // =============================================================================

    pub async fn get_status(&self, run_id: Uuid) -> Result<PipelineRun, PipelineError> {
        self.runs
            .find_by_id(run_id)
            .await?
            .ok_or(PipelineError::RunNotFound(run_id))
    }

    pub async fn list_runs(&self) -> Result<Vec<PipelineRun>, PipelineError> {
        Ok(self.runs.list_all().await?)
    }

    pub async fn list_artifacts(&self, run_id: Uuid) -> Result<Vec<Artifact>, PipelineError> {
        self.get_status(run_id).await?;
        Ok(self.artifacts.list(run_id).await?)
    }

    pub async fn get_artifact(&self, key: &ArtifactKey) -> Result<Artifact, PipelineError> {
        Ok(self.artifacts.get(key).await?)
    }

    pub async fn get_approval(&self, run_id: Uuid) -> Result<Option<ApprovalDecision>, PipelineError> {
        Ok(self.approval.decision_for(run_id).await?)
    }

    /// Desired state of a service as the orchestrator reports it
    pub async fn describe_target(&self, service: &str) -> Result<DeploymentTarget, PipelineError> {
        self.deploy
            .orchestrator()
            .describe_service(service)
            .await
            .map_err(|e| PipelineError::Orchestrator(e.reason))?
            .ok_or_else(|| PipelineError::TargetNotFound(service.to_string()))
    }

    // =============================================================================
    // Approvals, Cancellation and Timeouts
    // =============================================================================

    /// Store the decision for a run's approval gate
    ///
    /// The run is not advanced here; callers drive it afterwards.
    pub async fn record_approval(
        &self,
        run_id: Uuid,
        req: RecordApproval,
    ) -> Result<ApprovalDecision, PipelineError> {
        let actor = req.actor.trim();
        if actor.is_empty() {
            return Err(PipelineError::Validation("actor cannot be empty".to_string()));
        }

        let run = self.get_status(run_id).await?;
        if run.is_terminal() {
            return Err(PipelineError::InvalidState(format!(
                "Run {} is already {}",
                run_id, run.status
            )));
        }

        let decision = ApprovalDecision {
            run_id,
            actor: actor.to_string(),
            decision: req.decision,
            comment: req.comment.filter(|c| !c.trim().is_empty()),
            decided_at: Utc::now(),
        };

        Ok(self.approval.record(decision).await?)
    }

    /// Stop a run that has not entered the deploy stage
    pub async fn cancel(&self, run_id: Uuid) -> Result<PipelineRun, PipelineError> {
        let run = self
            .runs
            .apply(run_id, &RunTransition::Cancel, Utc::now())
            .await?;

        info!(run_id = %run_id, stage = %run.current_stage, "Pipeline run cancelled");
        Ok(run)
    }

    /// Fail runs that waited for approval longer than the configured timeout
    ///
    /// Runs that already have a decision are left for the next `advance`.
    /// Returns the ids of the runs that were failed.
    pub async fn expire_approvals(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, PipelineError> {
        let Some(timeout) = self.config.approval_timeout else {
            return Ok(Vec::new());
        };

        let mut expired = Vec::new();
        for run in self.runs.list_waiting_approval().await? {
            let Some(since) = run.waiting_since() else {
                continue;
            };
            if (now - since).to_std().unwrap_or_default() < timeout {
                continue;
            }
            if self.approval.decision_for(run.id).await?.is_some() {
                continue;
            }

            let cause = StageError::timeout("approval", timeout).to_string();
            let transition = RunTransition::FailStage {
                stage: StageName::Approve,
                kind: ErrorKind::Timeout,
                cause,
            };
            if self.transition(run.id, transition).await?.is_some() {
                warn!(run_id = %run.id, "Approval timed out; run failed");
                expired.push(run.id);
            }
        }

        Ok(expired)
    }
}

/// Report where a run is without executing anything
fn observe(run: PipelineRun) -> AdvanceResponse {
    let outcome = if run.is_terminal() {
        StageResult::Terminal { status: run.status }
    } else if run.status == RunStatus::WaitingApproval {
        StageResult::WaitingApproval
    } else {
        StageResult::InProgress {
            stage: run.current_stage,
        }
    };
    AdvanceResponse { outcome, run }
}
