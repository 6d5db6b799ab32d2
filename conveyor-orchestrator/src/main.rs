use std::sync::Arc;

use anyhow::{Context, Result};
use conveyor_core::domain::target::DeploymentTarget;
use conveyor_orchestrator::artifact::{ArtifactStore, MemoryArtifactStore, PostgresArtifactStore};
use conveyor_orchestrator::collaborators::{
    GitRemoteSource, HttpOrchestrator, LocalCluster, PassthroughSource, PodmanBuilder,
    ServiceOrchestrator, SourceControl, podman::check_podman_available,
};
use conveyor_orchestrator::config::{PipelineConfig, ResolverKind, ServerConfig};
use conveyor_orchestrator::repository::{
    MemoryRunRepository, PostgresRunRepository, RunRepository,
};
use conveyor_orchestrator::service::{ApprovalSweeper, Collaborators, PipelineController};
use conveyor_orchestrator::{api, db};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "conveyor_orchestrator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Conveyor Orchestrator...");

    let config = ServerConfig::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    tracing::info!(
        "Pipeline: {} ({}) -> {} [{}]",
        config.pipeline.source_repository,
        config.pipeline.target_branch,
        config.pipeline.registry_repository,
        config.pipeline.tag_policy
    );

    let (runs, artifacts) = storage(&config).await?;

    check_podman_available()?;
    tokio::fs::create_dir_all(&config.workspace)
        .await
        .context("Failed to create build workspace")?;

    let source: Arc<dyn SourceControl> = match config.source_resolver {
        ResolverKind::Passthrough => Arc::new(PassthroughSource::new()),
        ResolverKind::Git => Arc::new(GitRemoteSource::new()),
    };
    let builder = Arc::new(PodmanBuilder::new(
        config.workspace.clone(),
        config.build_context.clone(),
        config.pipeline.credentials_ref.clone(),
    ));
    let orchestrator = orchestrator(&config);

    let controller = Arc::new(PipelineController::new(
        config.pipeline.clone(),
        runs,
        artifacts,
        Collaborators {
            source,
            builder,
            orchestrator,
        },
    ));

    // Approval timeouts
    let sweeper = Arc::new(
        ApprovalSweeper::new(controller.clone())
            .with_check_interval(config.approval_check_interval),
    );
    let sweeper_task = {
        let sweeper = sweeper.clone();
        tokio::spawn(async move { sweeper.run().await })
    };

    // Build router with all API endpoints
    let app = api::create_router(controller);

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Failed to start server")?;

    if sweeper.is_running() {
        sweeper.stop();
        if let Err(e) = sweeper_task.await {
            tracing::warn!("Approval sweeper ended abnormally: {}", e);
        }
    }

    tracing::info!("Conveyor Orchestrator stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}

/// Postgres when a database is configured, memory otherwise
async fn storage(
    config: &ServerConfig,
) -> Result<(Arc<dyn RunRepository>, Arc<dyn ArtifactStore>)> {
    let Some(database_url) = &config.database_url else {
        tracing::warn!("DATABASE_URL not set; runs and artifacts are kept in memory");
        return Ok((
            Arc::new(MemoryRunRepository::new()),
            Arc::new(MemoryArtifactStore::new()),
        ));
    };

    tracing::info!("Connecting to database...");

    let pool = db::create_pool(database_url)
        .await
        .context("Failed to create database pool")?;

    tracing::info!("Database connection pool created");

    db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    Ok((
        Arc::new(PostgresRunRepository::new(pool.clone())),
        Arc::new(PostgresArtifactStore::new(pool)),
    ))
}

/// HTTP orchestrator when an endpoint is configured, an in-process cluster otherwise
fn orchestrator(config: &ServerConfig) -> Arc<dyn ServiceOrchestrator> {
    match &config.orchestrator_endpoint {
        Some(endpoint) => {
            tracing::info!("Deploying through orchestrator at {}", endpoint);
            Arc::new(HttpOrchestrator::new(endpoint.clone()))
        }
        None => {
            tracing::info!("Deploying to in-process cluster");
            Arc::new(LocalCluster::with_target(local_target(&config.pipeline)))
        }
    }
}

fn local_target(pipeline: &PipelineConfig) -> DeploymentTarget {
    let initial = format!("{}:latest", pipeline.registry_repository);
    pipeline
        .components
        .iter()
        .fold(DeploymentTarget::new(&pipeline.service), |target, name| {
            target.with_component(name, &initial, 1)
        })
}
