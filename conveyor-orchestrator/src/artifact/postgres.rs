//! Postgres artifact store
//!
//! Write-once is enforced by the `(run_id, stage, name)` primary key together
//! with `ON CONFLICT DO NOTHING`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conveyor_core::domain::artifact::{Artifact, ArtifactKey, NewArtifact};
use conveyor_core::domain::run::StageName;
use sqlx::PgPool;
use uuid::Uuid;

use super::{ArtifactError, ArtifactStore};

#[derive(Clone)]
pub struct PostgresArtifactStore {
    pool: PgPool,
}

impl PostgresArtifactStore {
    /// Tables are created by [`crate::db::run_migrations`]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ArtifactStore for PostgresArtifactStore {
    async fn seal(
        &self,
        run_id: Uuid,
        stage: StageName,
        artifact: NewArtifact,
    ) -> Result<Artifact, ArtifactError> {
        let key = ArtifactKey::new(run_id, stage, artifact.name);
        let now = Utc::now();

        let sequence: Option<i32> = sqlx::query_scalar(
            r#"
            INSERT INTO artifacts (run_id, stage, name, content_type, sequence, content, sealed_at)
            SELECT $1, $2, $3, $4, COALESCE(MAX(sequence), 0) + 1, $5, $6
            FROM artifacts
            WHERE run_id = $1
            ON CONFLICT (run_id, stage, name) DO NOTHING
            RETURNING sequence
            "#,
        )
        .bind(run_id)
        .bind(stage.as_str())
        .bind(&key.name)
        .bind(&artifact.content_type)
        .bind(&artifact.content)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        let Some(sequence) = sequence else {
            return Err(ArtifactError::AlreadySealed(key));
        };

        tracing::debug!(key = %key, sequence, "Sealed artifact");

        Ok(Artifact {
            key,
            content_type: artifact.content_type,
            sequence: sequence as u32,
            sealed_at: now,
            content: artifact.content,
        })
    }

    async fn get(&self, key: &ArtifactKey) -> Result<Artifact, ArtifactError> {
        let row = sqlx::query_as::<_, ArtifactRow>(
            r#"
            SELECT run_id, stage, name, content_type, sequence, content, sealed_at
            FROM artifacts
            WHERE run_id = $1 AND stage = $2 AND name = $3
            "#,
        )
        .bind(key.run_id)
        .bind(key.stage.as_str())
        .bind(&key.name)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.try_into(),
            None => Err(ArtifactError::NotFound(key.clone())),
        }
    }

    async fn list(&self, run_id: Uuid) -> Result<Vec<Artifact>, ArtifactError> {
        let rows = sqlx::query_as::<_, ArtifactRow>(
            r#"
            SELECT run_id, stage, name, content_type, sequence, content, sealed_at
            FROM artifacts
            WHERE run_id = $1
            ORDER BY sequence ASC
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Artifact::try_from).collect()
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct ArtifactRow {
    run_id: Uuid,
    stage: String,
    name: String,
    content_type: String,
    sequence: i32,
    content: Vec<u8>,
    sealed_at: DateTime<Utc>,
}

impl TryFrom<ArtifactRow> for Artifact {
    type Error = ArtifactError;

    fn try_from(row: ArtifactRow) -> Result<Self, Self::Error> {
        let stage = row
            .stage
            .parse::<StageName>()
            .map_err(ArtifactError::Backend)?;

        Ok(Artifact {
            key: ArtifactKey::new(row.run_id, stage, row.name),
            content_type: row.content_type,
            sequence: row.sequence as u32,
            sealed_at: row.sealed_at,
            content: row.content,
        })
    }
}
