//! Run DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::run::{PipelineRun, RunStatus, StageName};
use crate::error::ErrorKind;

/// Lightweight run summary for listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: Uuid,
    pub revision_id: String,
    pub branch: String,
    pub status: RunStatus,
    pub current_stage: StageName,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_kind: Option<ErrorKind>,
}

impl From<&PipelineRun> for RunSummary {
    fn from(run: &PipelineRun) -> Self {
        Self {
            id: run.id,
            revision_id: run.revision.id.clone(),
            branch: run.revision.branch.clone(),
            status: run.status,
            current_stage: run.current_stage,
            created_at: run.created_at,
            completed_at: run.completed_at,
            error_kind: run.failure.as_ref().map(|failure| failure.kind),
        }
    }
}

/// Result of one `advance` call on a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum StageResult {
    /// The stage succeeded and the next one is scheduled
    Continue { completed: StageName, next: StageName },
    /// The run is suspended at the approval gate
    WaitingApproval,
    /// Another caller is executing this stage; nothing was done
    InProgress { stage: StageName },
    /// The last stage succeeded
    Succeeded,
    /// The stage failed and the run with it
    Failed {
        stage: StageName,
        kind: ErrorKind,
        cause: String,
    },
    /// The approval gate recorded a rejection
    Rejected { cause: String },
    /// The run had already finished; nothing was done
    Terminal { status: RunStatus },
}

impl StageResult {
    /// Whether another `advance` call can make progress right away
    pub fn can_continue(&self) -> bool {
        matches!(self, StageResult::Continue { .. })
    }
}

/// Response body of the advance endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvanceResponse {
    pub outcome: StageResult,
    pub run: PipelineRun,
}
