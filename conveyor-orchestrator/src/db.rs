use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Runs are stored as a JSON document; status and revision are copied out for queries
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_runs (
            id UUID PRIMARY KEY,
            revision_id VARCHAR(255) NOT NULL,
            status VARCHAR(50) NOT NULL,
            document JSONB NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // At most one non-terminal run per revision
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_pipeline_runs_active_revision
        ON pipeline_runs(revision_id)
        WHERE status NOT IN ('succeeded', 'failed', 'rejected', 'cancelled')
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_pipeline_runs_created_at ON pipeline_runs(created_at DESC)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pipeline_runs_status ON pipeline_runs(status)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS approvals (
            run_id UUID PRIMARY KEY REFERENCES pipeline_runs(id) ON DELETE CASCADE,
            actor VARCHAR(255) NOT NULL,
            decision VARCHAR(20) NOT NULL,
            comment TEXT,
            decided_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS artifacts (
            run_id UUID NOT NULL REFERENCES pipeline_runs(id) ON DELETE CASCADE,
            stage VARCHAR(20) NOT NULL,
            name VARCHAR(255) NOT NULL,
            content_type VARCHAR(255) NOT NULL,
            sequence INTEGER NOT NULL,
            content BYTEA NOT NULL,
            sealed_at TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (run_id, stage, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_artifacts_run_id ON artifacts(run_id, sequence)")
        .execute(pool)
        .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
