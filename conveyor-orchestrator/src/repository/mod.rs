//! Repository Module
//!
//! Persistence for pipeline runs and approval decisions. Run state only changes
//! through [`RunRepository::apply`], which loads the run, applies the transition
//! and stores it back while holding the run exclusively. That makes stage claims
//! atomic compare-and-set operations for concurrent `advance` callers.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conveyor_core::domain::approval::ApprovalDecision;
use conveyor_core::domain::run::{PipelineRun, RunTransition, TransitionError};
use thiserror::Error;
use uuid::Uuid;

pub use memory::MemoryRunRepository;
pub use postgres::PostgresRunRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Run not found: {0}")]
    NotFound(Uuid),

    #[error("Revision {revision_id} already has an active run ({existing})")]
    ActiveRunExists { revision_id: String, existing: Uuid },

    #[error("Run {} already has a recorded decision ({})", .0.run_id, .0.decision)]
    AlreadyDecided(Box<ApprovalDecision>),

    #[error(transparent)]
    Refused(#[from] TransitionError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

#[async_trait]
pub trait RunRepository: Send + Sync {
    /// Store a new run unless its revision already has a non-terminal one
    async fn insert_if_no_active(&self, run: PipelineRun) -> Result<PipelineRun, RepositoryError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<PipelineRun>, RepositoryError>;

    /// All runs, newest first
    async fn list_all(&self) -> Result<Vec<PipelineRun>, RepositoryError>;

    /// Runs currently suspended at the approval gate
    async fn list_waiting_approval(&self) -> Result<Vec<PipelineRun>, RepositoryError>;

    /// Apply a transition to the stored run and return the new state
    async fn apply(
        &self,
        id: Uuid,
        transition: &RunTransition,
        now: DateTime<Utc>,
    ) -> Result<PipelineRun, RepositoryError>;

    /// Store the single decision for a run's gate
    ///
    /// A second decision fails with [`RepositoryError::AlreadyDecided`] carrying
    /// the stored one.
    async fn record_approval(
        &self,
        decision: ApprovalDecision,
    ) -> Result<ApprovalDecision, RepositoryError>;

    async fn find_approval(&self, run_id: Uuid)
    -> Result<Option<ApprovalDecision>, RepositoryError>;
}
