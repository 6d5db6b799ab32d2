use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conveyor_core::domain::approval::ApprovalDecision;
use conveyor_core::domain::run::{PipelineRun, RunStatus, RunTransition};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{RepositoryError, RunRepository};

/// In-memory run repository for local mode and tests
#[derive(Debug, Clone, Default)]
pub struct MemoryRunRepository {
    runs: Arc<RwLock<HashMap<Uuid, PipelineRun>>>,
    approvals: Arc<RwLock<HashMap<Uuid, ApprovalDecision>>>,
}

impl MemoryRunRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunRepository for MemoryRunRepository {
    async fn insert_if_no_active(&self, run: PipelineRun) -> Result<PipelineRun, RepositoryError> {
        let mut runs = self.runs.write().await;

        if let Some(existing) = runs
            .values()
            .find(|r| r.revision.id == run.revision.id && !r.is_terminal())
        {
            return Err(RepositoryError::ActiveRunExists {
                revision_id: run.revision.id.clone(),
                existing: existing.id,
            });
        }

        runs.insert(run.id, run.clone());
        Ok(run)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<PipelineRun>, RepositoryError> {
        Ok(self.runs.read().await.get(&id).cloned())
    }

    async fn list_all(&self) -> Result<Vec<PipelineRun>, RepositoryError> {
        let mut runs: Vec<_> = self.runs.read().await.values().cloned().collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(runs)
    }

    async fn list_waiting_approval(&self) -> Result<Vec<PipelineRun>, RepositoryError> {
        let runs = self.runs.read().await;
        Ok(runs
            .values()
            .filter(|r| r.status == RunStatus::WaitingApproval)
            .cloned()
            .collect())
    }

    async fn apply(
        &self,
        id: Uuid,
        transition: &RunTransition,
        now: DateTime<Utc>,
    ) -> Result<PipelineRun, RepositoryError> {
        let mut runs = self.runs.write().await;
        let run = runs.get_mut(&id).ok_or(RepositoryError::NotFound(id))?;

        // Work on a copy so a refused transition leaves the stored run untouched
        let mut updated = run.clone();
        updated.apply(transition, now)?;
        *run = updated.clone();

        Ok(updated)
    }

    async fn record_approval(
        &self,
        decision: ApprovalDecision,
    ) -> Result<ApprovalDecision, RepositoryError> {
        let mut approvals = self.approvals.write().await;

        if let Some(existing) = approvals.get(&decision.run_id) {
            return Err(RepositoryError::AlreadyDecided(Box::new(existing.clone())));
        }

        approvals.insert(decision.run_id, decision.clone());
        Ok(decision)
    }

    async fn find_approval(
        &self,
        run_id: Uuid,
    ) -> Result<Option<ApprovalDecision>, RepositoryError> {
        Ok(self.approvals.read().await.get(&run_id).cloned())
    }
}
