//! Artifact Store
//!
//! Ordered, write-once storage for the blobs stages hand to each other. A key
//! can be sealed exactly once; every later seal of the same key is refused and
//! the stored content stays untouched.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use conveyor_core::domain::artifact::{Artifact, ArtifactKey, NewArtifact};
use conveyor_core::domain::run::StageName;
use thiserror::Error;
use uuid::Uuid;

pub use memory::MemoryArtifactStore;
pub use postgres::PostgresArtifactStore;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Artifact not found: {0}")]
    NotFound(ArtifactKey),

    #[error("Artifact already sealed: {0}")]
    AlreadySealed(ArtifactKey),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for ArtifactError {
    fn from(err: sqlx::Error) -> Self {
        ArtifactError::Backend(err.to_string())
    }
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Seal an artifact produced by `stage` of `run_id`
    ///
    /// The artifact gets the next sequence number of its run.
    async fn seal(
        &self,
        run_id: Uuid,
        stage: StageName,
        artifact: NewArtifact,
    ) -> Result<Artifact, ArtifactError>;

    async fn get(&self, key: &ArtifactKey) -> Result<Artifact, ArtifactError>;

    /// All artifacts of a run in the order they were sealed
    async fn list(&self, run_id: Uuid) -> Result<Vec<Artifact>, ArtifactError>;
}
