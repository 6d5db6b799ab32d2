//! Pipeline run domain types
//!
//! A run is the instance of the pipeline for one triggering revision. Its state
//! only changes through [`PipelineRun::apply`], which both run repositories call
//! while holding the run exclusively. Keeping the transition rules here means
//! the in-memory and Postgres stores cannot disagree about them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::manifest::MANIFEST_ARTIFACT;
use crate::domain::revision::Revision;
use crate::error::ErrorKind;

/// Artifact name under which the source stage seals the resolved revision
pub const SOURCE_ARTIFACT: &str = "source.json";

/// Artifact name under which the deploy stage records what it changed
pub const DEPLOYMENT_ARTIFACT: &str = "deployment.json";

/// The fixed, totally ordered stages of a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageName {
    Source,
    Build,
    Approve,
    Deploy,
}

impl StageName {
    pub const ALL: [StageName; 4] = [
        StageName::Source,
        StageName::Build,
        StageName::Approve,
        StageName::Deploy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Source => "source",
            StageName::Build => "build",
            StageName::Approve => "approve",
            StageName::Deploy => "deploy",
        }
    }

    /// The stage that follows this one, if any
    pub fn next(&self) -> Option<StageName> {
        match self {
            StageName::Source => Some(StageName::Build),
            StageName::Build => Some(StageName::Approve),
            StageName::Approve => Some(StageName::Deploy),
            StageName::Deploy => None,
        }
    }

    /// Artifacts this stage reads, as `(producing stage, artifact name)`
    ///
    /// The source stage reads the trigger stored on the run instead.
    pub fn inputs(&self) -> &'static [(StageName, &'static str)] {
        match self {
            StageName::Source => &[],
            StageName::Build => &[(StageName::Source, SOURCE_ARTIFACT)],
            StageName::Approve => &[(StageName::Build, MANIFEST_ARTIFACT)],
            StageName::Deploy => &[(StageName::Approve, MANIFEST_ARTIFACT)],
        }
    }
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageName::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| format!("unknown stage '{}'", s))
    }
}

/// Status of a single stage within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StageStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    WaitingApproval,
    Rejected,
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageStatus::Pending => write!(f, "pending"),
            StageStatus::Running => write!(f, "running"),
            StageStatus::Succeeded => write!(f, "succeeded"),
            StageStatus::Failed => write!(f, "failed"),
            StageStatus::WaitingApproval => write!(f, "waitingApproval"),
            StageStatus::Rejected => write!(f, "rejected"),
        }
    }
}

/// Overall status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunStatus {
    Pending,
    Running,
    WaitingApproval,
    Succeeded,
    Failed,
    Rejected,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::WaitingApproval => "waitingApproval",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Rejected => "rejected",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Rejected | RunStatus::Cancelled
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-stage bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub name: StageName,
    pub status: StageStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StageRecord {
    fn pending(name: StageName) -> Self {
        Self {
            name,
            status: StageStatus::Pending,
            started_at: None,
            completed_at: None,
        }
    }
}

/// Terminal error recorded on a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub stage: StageName,
    pub kind: ErrorKind,
    pub cause: String,
}

/// One execution of the pipeline for a triggering revision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: Uuid,
    pub revision: Revision,
    pub status: RunStatus,
    pub current_stage: StageName,
    pub stages: Vec<StageRecord>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failure: Option<RunFailure>,
}

/// A requested state change on a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunTransition {
    /// Mark the current stage as running; the atomic claim that makes `advance` idempotent
    ClaimStage(StageName),
    /// Current stage produced its output
    CompleteStage(StageName),
    /// Approval gate found no decision yet
    SuspendForApproval,
    /// Current stage failed; the whole run fails with it
    FailStage {
        stage: StageName,
        kind: ErrorKind,
        cause: String,
    },
    /// A human rejected the run at the approval gate
    Reject { cause: String },
    /// Caller asked to stop the run before deployment
    Cancel,
}

impl std::fmt::Display for RunTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunTransition::ClaimStage(stage) => write!(f, "claim({})", stage),
            RunTransition::CompleteStage(stage) => write!(f, "complete({})", stage),
            RunTransition::SuspendForApproval => write!(f, "suspend"),
            RunTransition::FailStage { stage, .. } => write!(f, "fail({})", stage),
            RunTransition::Reject { .. } => write!(f, "reject"),
            RunTransition::Cancel => write!(f, "cancel"),
        }
    }
}

/// A transition that is not allowed from the run's current state
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot {transition} run {run_id}: {reason}")]
pub struct TransitionError {
    pub run_id: Uuid,
    pub transition: String,
    pub reason: String,
}

impl PipelineRun {
    /// Create a run in `pending` with its first stage scheduled
    pub fn new(revision: Revision, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            revision,
            status: RunStatus::Pending,
            current_stage: StageName::Source,
            stages: StageName::ALL.into_iter().map(StageRecord::pending).collect(),
            created_at: now,
            started_at: None,
            completed_at: None,
            failure: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn stage(&self, name: StageName) -> Option<&StageRecord> {
        self.stages.iter().find(|record| record.name == name)
    }

    pub fn stage_status(&self, name: StageName) -> StageStatus {
        self.stage(name)
            .map(|record| record.status)
            .unwrap_or(StageStatus::Pending)
    }

    /// When the run started waiting at the approval gate, if it is waiting
    pub fn waiting_since(&self) -> Option<DateTime<Utc>> {
        if self.status != RunStatus::WaitingApproval {
            return None;
        }
        self.stage(StageName::Approve)
            .and_then(|record| record.started_at)
    }

    /// Apply a transition, or explain why it is not allowed
    pub fn apply(
        &mut self,
        transition: &RunTransition,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if self.is_terminal() {
            return Err(self.refuse(transition, format!("run is already {}", self.status)));
        }

        match transition {
            RunTransition::ClaimStage(stage) => {
                self.expect_current(transition, *stage)?;
                let record = self.stage_mut(transition, *stage)?;
                let claimable = match record.status {
                    StageStatus::Pending => true,
                    StageStatus::WaitingApproval => *stage == StageName::Approve,
                    _ => false,
                };
                if !claimable {
                    let reason = format!("stage {} is {}", stage, record.status);
                    return Err(self.refuse(transition, reason));
                }
                record.status = StageStatus::Running;
                record.started_at.get_or_insert(now);
                self.status = RunStatus::Running;
                self.started_at.get_or_insert(now);
            }
            RunTransition::CompleteStage(stage) => {
                self.expect_current(transition, *stage)?;
                self.expect_stage_status(transition, *stage, &[StageStatus::Running])?;
                let record = self.stage_mut(transition, *stage)?;
                record.status = StageStatus::Succeeded;
                record.completed_at = Some(now);
                match stage.next() {
                    Some(next) => {
                        self.current_stage = next;
                        self.status = RunStatus::Running;
                    }
                    None => {
                        self.status = RunStatus::Succeeded;
                        self.completed_at = Some(now);
                    }
                }
            }
            RunTransition::SuspendForApproval => {
                self.expect_current(transition, StageName::Approve)?;
                self.expect_stage_status(transition, StageName::Approve, &[StageStatus::Running])?;
                let record = self.stage_mut(transition, StageName::Approve)?;
                record.status = StageStatus::WaitingApproval;
                self.status = RunStatus::WaitingApproval;
            }
            RunTransition::FailStage { stage, kind, cause } => {
                self.expect_current(transition, *stage)?;
                self.expect_stage_status(
                    transition,
                    *stage,
                    &[StageStatus::Running, StageStatus::WaitingApproval],
                )?;
                let record = self.stage_mut(transition, *stage)?;
                record.status = StageStatus::Failed;
                record.completed_at = Some(now);
                self.finish(RunStatus::Failed, *stage, *kind, cause.clone(), now);
            }
            RunTransition::Reject { cause } => {
                self.expect_current(transition, StageName::Approve)?;
                self.expect_stage_status(transition, StageName::Approve, &[StageStatus::Running])?;
                let record = self.stage_mut(transition, StageName::Approve)?;
                record.status = StageStatus::Rejected;
                record.completed_at = Some(now);
                self.finish(
                    RunStatus::Rejected,
                    StageName::Approve,
                    ErrorKind::Rejected,
                    cause.clone(),
                    now,
                );
            }
            RunTransition::Cancel => {
                let stage = self.current_stage;
                let status = self.stage_status(stage);
                if stage == StageName::Deploy && status != StageStatus::Pending {
                    return Err(self.refuse(
                        transition,
                        "deploy stage has been entered; the run is committed".to_string(),
                    ));
                }
                if matches!(status, StageStatus::Running | StageStatus::WaitingApproval) {
                    let record = self.stage_mut(transition, stage)?;
                    record.status = StageStatus::Failed;
                    record.completed_at = Some(now);
                }
                self.finish(
                    RunStatus::Cancelled,
                    stage,
                    ErrorKind::Cancelled,
                    format!("cancelled during {} stage", stage),
                    now,
                );
            }
        }

        Ok(())
    }

    fn finish(
        &mut self,
        status: RunStatus,
        stage: StageName,
        kind: ErrorKind,
        cause: String,
        now: DateTime<Utc>,
    ) {
        self.status = status;
        self.completed_at = Some(now);
        self.failure = Some(RunFailure { stage, kind, cause });
    }

    fn expect_current(
        &self,
        transition: &RunTransition,
        stage: StageName,
    ) -> Result<(), TransitionError> {
        if self.current_stage != stage {
            let reason = format!(
                "stage {} is not current (current stage is {})",
                stage, self.current_stage
            );
            return Err(self.refuse(transition, reason));
        }
        Ok(())
    }

    fn expect_stage_status(
        &self,
        transition: &RunTransition,
        stage: StageName,
        allowed: &[StageStatus],
    ) -> Result<(), TransitionError> {
        let status = self.stage_status(stage);
        if !allowed.contains(&status) {
            return Err(self.refuse(transition, format!("stage {} is {}", stage, status)));
        }
        Ok(())
    }

    fn stage_mut(
        &mut self,
        transition: &RunTransition,
        stage: StageName,
    ) -> Result<&mut StageRecord, TransitionError> {
        let refusal = self.refuse(transition, format!("run has no record for stage {}", stage));
        self.stages
            .iter_mut()
            .find(|record| record.name == stage)
            .ok_or(refusal)
    }

    fn refuse(&self, transition: &RunTransition, reason: String) -> TransitionError {
        TransitionError {
            run_id: self.id,
            transition: transition.to_string(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run() -> PipelineRun {
        PipelineRun::new(Revision::new("abc123", "repo", "main"), Utc::now())
    }

    fn pass(run: &mut PipelineRun, stage: StageName) {
        let now = Utc::now();
        run.apply(&RunTransition::ClaimStage(stage), now).unwrap();
        run.apply(&RunTransition::CompleteStage(stage), now).unwrap();
    }

    #[test]
    fn test_new_run_is_pending_at_source() {
        let run = run();
        assert_eq!(run.status, RunStatus::Pending);
        assert_eq!(run.current_stage, StageName::Source);
        assert_eq!(run.stages.len(), 4);
        assert!(run.stages.iter().all(|s| s.status == StageStatus::Pending));
    }

    #[test]
    fn test_full_pipeline_succeeds() {
        let mut run = run();
        for stage in StageName::ALL {
            pass(&mut run, stage);
        }
        assert_eq!(run.status, RunStatus::Succeeded);
        assert!(run.completed_at.is_some());
        assert!(run.failure.is_none());
        assert!(run.stages.iter().all(|s| s.status == StageStatus::Succeeded));
    }

    #[test]
    fn test_claim_is_refused_while_running() {
        let mut run = run();
        run.apply(&RunTransition::ClaimStage(StageName::Source), Utc::now())
            .unwrap();
        let err = run
            .apply(&RunTransition::ClaimStage(StageName::Source), Utc::now())
            .unwrap_err();
        assert!(err.reason.contains("running"));
    }

    #[test]
    fn test_stages_cannot_be_skipped() {
        let mut run = run();
        let err = run
            .apply(&RunTransition::ClaimStage(StageName::Build), Utc::now())
            .unwrap_err();
        assert!(err.reason.contains("not current"));
        assert_eq!(run.stage_status(StageName::Build), StageStatus::Pending);
    }

    #[test]
    fn test_approval_suspend_and_resume() {
        let mut run = run();
        pass(&mut run, StageName::Source);
        pass(&mut run, StageName::Build);

        run.apply(&RunTransition::ClaimStage(StageName::Approve), Utc::now())
            .unwrap();
        run.apply(&RunTransition::SuspendForApproval, Utc::now())
            .unwrap();
        assert_eq!(run.status, RunStatus::WaitingApproval);
        assert!(run.waiting_since().is_some());

        run.apply(&RunTransition::ClaimStage(StageName::Approve), Utc::now())
            .unwrap();
        run.apply(&RunTransition::CompleteStage(StageName::Approve), Utc::now())
            .unwrap();
        assert_eq!(run.current_stage, StageName::Deploy);
        assert_eq!(run.status, RunStatus::Running);
    }

    #[test]
    fn test_reject_is_terminal() {
        let mut run = run();
        pass(&mut run, StageName::Source);
        pass(&mut run, StageName::Build);
        run.apply(&RunTransition::ClaimStage(StageName::Approve), Utc::now())
            .unwrap();
        run.apply(
            &RunTransition::Reject {
                cause: "rejected by bob".to_string(),
            },
            Utc::now(),
        )
        .unwrap();

        assert_eq!(run.status, RunStatus::Rejected);
        assert_eq!(run.stage_status(StageName::Approve), StageStatus::Rejected);
        assert_eq!(run.stage_status(StageName::Deploy), StageStatus::Pending);
        let failure = run.failure.clone().unwrap();
        assert_eq!(failure.kind, ErrorKind::Rejected);

        assert!(
            run.apply(&RunTransition::ClaimStage(StageName::Deploy), Utc::now())
                .is_err()
        );
    }

    #[test]
    fn test_fail_stage_records_kind_and_cause() {
        let mut run = run();
        pass(&mut run, StageName::Source);
        run.apply(&RunTransition::ClaimStage(StageName::Build), Utc::now())
            .unwrap();
        run.apply(
            &RunTransition::FailStage {
                stage: StageName::Build,
                kind: ErrorKind::RegistryPush,
                cause: "push failed".to_string(),
            },
            Utc::now(),
        )
        .unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.stage_status(StageName::Build), StageStatus::Failed);
        let failure = run.failure.unwrap();
        assert_eq!(failure.stage, StageName::Build);
        assert_eq!(failure.kind, ErrorKind::RegistryPush);
        assert_eq!(failure.cause, "push failed");
    }

    #[test]
    fn test_cancel_before_deploy() {
        let mut run = run();
        pass(&mut run, StageName::Source);
        run.apply(&RunTransition::ClaimStage(StageName::Build), Utc::now())
            .unwrap();
        run.apply(&RunTransition::Cancel, Utc::now()).unwrap();

        assert_eq!(run.status, RunStatus::Cancelled);
        assert_eq!(run.stage_status(StageName::Build), StageStatus::Failed);
        assert_eq!(run.failure.unwrap().kind, ErrorKind::Cancelled);
    }

    #[test]
    fn test_cancel_refused_once_deploy_entered() {
        let mut run = run();
        pass(&mut run, StageName::Source);
        pass(&mut run, StageName::Build);
        pass(&mut run, StageName::Approve);

        run.apply(&RunTransition::ClaimStage(StageName::Deploy), Utc::now())
            .unwrap();
        let err = run.apply(&RunTransition::Cancel, Utc::now()).unwrap_err();
        assert!(err.reason.contains("committed"));
        assert_eq!(run.status, RunStatus::Running);
    }

    #[test]
    fn test_terminal_run_refuses_transitions() {
        let mut run = run();
        run.apply(&RunTransition::Cancel, Utc::now()).unwrap();
        let err = run
            .apply(&RunTransition::ClaimStage(StageName::Source), Utc::now())
            .unwrap_err();
        assert!(err.reason.contains("cancelled"));
    }

    #[test]
    fn test_stage_name_parse_and_inputs() {
        assert_eq!("approve".parse::<StageName>(), Ok(StageName::Approve));
        assert!("release".parse::<StageName>().is_err());
        assert_eq!(
            StageName::Deploy.inputs(),
            &[(StageName::Approve, MANIFEST_ARTIFACT)]
        );
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&StageStatus::WaitingApproval).unwrap(),
            "\"waitingApproval\""
        );
        assert_eq!(
            serde_json::to_string(&RunStatus::Cancelled).unwrap(),
            "\"cancelled\""
        );
    }
}
