//! Postgres run repository
//!
//! Runs are stored as JSON documents with their status and revision copied into
//! columns. Transitions lock the row with `SELECT ... FOR UPDATE` for the
//! duration of the read-modify-write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conveyor_core::domain::approval::{ApprovalDecision, Decision};
use conveyor_core::domain::run::{PipelineRun, RunStatus, RunTransition};
use sqlx::PgPool;
use uuid::Uuid;

use super::{RepositoryError, RunRepository};

#[derive(Clone)]
pub struct PostgresRunRepository {
    pool: PgPool,
}

impl PostgresRunRepository {
    /// Tables are created by [`crate::db::run_migrations`]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn active_run_for(&self, revision_id: &str) -> Result<Option<Uuid>, RepositoryError> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id FROM pipeline_runs
            WHERE revision_id = $1
              AND status NOT IN ('succeeded', 'failed', 'rejected', 'cancelled')
            "#,
        )
        .bind(revision_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(id)
    }
}

#[async_trait]
impl RunRepository for PostgresRunRepository {
    async fn insert_if_no_active(&self, run: PipelineRun) -> Result<PipelineRun, RepositoryError> {
        let inserted = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO pipeline_runs (id, revision_id, status, document, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            ON CONFLICT (revision_id)
                WHERE status NOT IN ('succeeded', 'failed', 'rejected', 'cancelled')
                DO NOTHING
            RETURNING id
            "#,
        )
        .bind(run.id)
        .bind(&run.revision.id)
        .bind(run.status.as_str())
        .bind(serde_json::to_value(&run)?)
        .bind(run.created_at)
        .fetch_optional(&self.pool)
        .await?;

        if inserted.is_some() {
            return Ok(run);
        }

        let existing = self.active_run_for(&run.revision.id).await?.ok_or_else(|| {
            RepositoryError::Corrupt(format!(
                "insert of run for revision {} conflicted without an active run",
                run.revision.id
            ))
        })?;

        Err(RepositoryError::ActiveRunExists {
            revision_id: run.revision.id,
            existing,
        })
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<PipelineRun>, RepositoryError> {
        let document = sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT document FROM pipeline_runs WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        document
            .map(serde_json::from_value)
            .transpose()
            .map_err(RepositoryError::from)
    }

    async fn list_all(&self) -> Result<Vec<PipelineRun>, RepositoryError> {
        let documents = sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT document FROM pipeline_runs ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        decode_all(documents)
    }

    async fn list_waiting_approval(&self) -> Result<Vec<PipelineRun>, RepositoryError> {
        let documents = sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT document FROM pipeline_runs WHERE status = $1 ORDER BY created_at ASC",
        )
        .bind(RunStatus::WaitingApproval.as_str())
        .fetch_all(&self.pool)
        .await?;

        decode_all(documents)
    }

    async fn apply(
        &self,
        id: Uuid,
        transition: &RunTransition,
        now: DateTime<Utc>,
    ) -> Result<PipelineRun, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let document = sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT document FROM pipeline_runs WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(RepositoryError::NotFound(id))?;

        let mut run: PipelineRun = serde_json::from_value(document)?;
        // Dropping the transaction on refusal rolls it back and releases the lock
        run.apply(transition, now)?;

        sqlx::query(
            r#"
            UPDATE pipeline_runs
            SET status = $1, document = $2, updated_at = $3
            WHERE id = $4
            "#,
        )
        .bind(run.status.as_str())
        .bind(serde_json::to_value(&run)?)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(run)
    }

    async fn record_approval(
        &self,
        decision: ApprovalDecision,
    ) -> Result<ApprovalDecision, RepositoryError> {
        let inserted = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO approvals (run_id, actor, decision, comment, decided_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (run_id) DO NOTHING
            RETURNING run_id
            "#,
        )
        .bind(decision.run_id)
        .bind(&decision.actor)
        .bind(decision.decision.as_str())
        .bind(&decision.comment)
        .bind(decision.decided_at)
        .fetch_optional(&self.pool)
        .await?;

        if inserted.is_some() {
            return Ok(decision);
        }

        let existing = self.find_approval(decision.run_id).await?.ok_or_else(|| {
            RepositoryError::Corrupt(format!(
                "approval insert for run {} conflicted without a stored decision",
                decision.run_id
            ))
        })?;

        Err(RepositoryError::AlreadyDecided(Box::new(existing)))
    }

    async fn find_approval(
        &self,
        run_id: Uuid,
    ) -> Result<Option<ApprovalDecision>, RepositoryError> {
        let row = sqlx::query_as::<_, ApprovalRow>(
            r#"
            SELECT run_id, actor, decision, comment, decided_at
            FROM approvals
            WHERE run_id = $1
            "#,
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ApprovalDecision::try_from).transpose()
    }
}

fn decode_all(documents: Vec<serde_json::Value>) -> Result<Vec<PipelineRun>, RepositoryError> {
    documents
        .into_iter()
        .map(|document| serde_json::from_value(document).map_err(RepositoryError::from))
        .collect()
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct ApprovalRow {
    run_id: Uuid,
    actor: String,
    decision: String,
    comment: Option<String>,
    decided_at: DateTime<Utc>,
}

impl TryFrom<ApprovalRow> for ApprovalDecision {
    type Error = RepositoryError;

    fn try_from(row: ApprovalRow) -> Result<Self, Self::Error> {
        let decision = row
            .decision
            .parse::<Decision>()
            .map_err(RepositoryError::Corrupt)?;

        Ok(ApprovalDecision {
            run_id: row.run_id,
            actor: row.actor,
            decision,
            comment: row.comment,
            decided_at: row.decided_at,
        })
    }
}
