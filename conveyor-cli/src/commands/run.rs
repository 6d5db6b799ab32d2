//! Run command handlers
//!
//! Handles listing runs, viewing details and artifacts, advancing a run by
//! hand and cancelling it.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use conveyor_core::domain::run::{PipelineRun, RunStatus, StageStatus};
use conveyor_core::dto::run::{RunSummary, StageResult};

use crate::config::Config;
use crate::id_resolver::resolve_run_id;
use conveyor_client::OrchestratorClient;

/// Run subcommands
#[derive(Subcommand)]
pub enum RunCommands {
    /// List all runs
    List,
    /// Get run details
    Get {
        /// Run ID or unambiguous prefix
        id: String,
    },
    /// List the artifacts a run has sealed
    Artifacts {
        /// Run ID or unambiguous prefix
        id: String,

        /// Print the content of the named artifact (the latest one with that name)
        #[arg(short, long)]
        show: Option<String>,
    },
    /// Execute the current stage of a run once
    Advance {
        /// Run ID or unambiguous prefix
        id: String,
    },
    /// Cancel a run that has not entered the deploy stage
    Cancel {
        /// Run ID or unambiguous prefix
        id: String,
    },
}

/// Handle run commands
pub async fn handle_run_command(command: RunCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        RunCommands::List => list_runs(&client).await,
        RunCommands::Get { id } => get_run(&client, &id).await,
        RunCommands::Artifacts { id, show } => list_artifacts(&client, &id, show).await,
        RunCommands::Advance { id } => advance_run(&client, &id).await,
        RunCommands::Cancel { id } => cancel_run(&client, &id).await,
    }
}

async fn list_runs(client: &OrchestratorClient) -> Result<()> {
    let runs = client.list_runs().await.context("Failed to list runs")?;

    if runs.is_empty() {
        println!("{}", "No runs found.".yellow());
    } else {
        println!("{}", format!("Found {} run(s):", runs.len()).bold());
        println!();
        for run in runs {
            print_run_summary(&run);
        }
    }

    Ok(())
}

async fn get_run(client: &OrchestratorClient, id: &str) -> Result<()> {
    let run_id = resolve_run_id(client, id).await?;
    let run = client.get_run(run_id).await?;

    print_run_details(&run);

    Ok(())
}

async fn list_artifacts(client: &OrchestratorClient, id: &str, show: Option<String>) -> Result<()> {
    let run_id = resolve_run_id(client, id).await?;
    let artifacts = client.list_artifacts(run_id).await?;

    if let Some(name) = show {
        let artifact = artifacts
            .iter()
            .rev()
            .find(|a| a.name == name)
            .with_context(|| format!("Run {} has no artifact named '{}'", run_id, name))?;

        let content = client
            .get_artifact_content(run_id, artifact.stage, &artifact.name)
            .await?;

        match serde_json::from_slice::<serde_json::Value>(&content) {
            Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
            Err(_) => println!("{}", String::from_utf8_lossy(&content)),
        }
        return Ok(());
    }

    if artifacts.is_empty() {
        println!("{}", "No artifacts sealed yet.".yellow());
        return Ok(());
    }

    println!("{}", format!("Artifacts for run {}:", run_id).bold());
    for artifact in artifacts {
        println!(
            "  {:>2}. {:<8} {:<24} {:>6} B  {}",
            artifact.sequence,
            artifact.stage.to_string().cyan(),
            artifact.name,
            artifact.size,
            artifact
                .sealed_at
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
                .dimmed()
        );
    }

    Ok(())
}

async fn advance_run(client: &OrchestratorClient, id: &str) -> Result<()> {
    let run_id = resolve_run_id(client, id).await?;
    let response = client.advance_run(run_id).await?;

    match &response.outcome {
        StageResult::Continue { completed, next } => {
            println!(
                "{} {} succeeded, {} is next",
                "✓".green(),
                completed.to_string().bold(),
                next.to_string().bold()
            );
        }
        StageResult::WaitingApproval => {
            println!("{}", "⏸ Waiting for approval".yellow());
        }
        StageResult::InProgress { stage } => {
            println!("{} {} is already running", "…".cyan(), stage);
        }
        StageResult::Succeeded => {
            println!("{}", "✓ Run succeeded".green().bold());
        }
        StageResult::Failed { stage, kind, cause } => {
            println!("{} {} failed ({})", "✗".red(), stage.to_string().bold(), kind);
            println!("  {}", cause.red());
        }
        StageResult::Rejected { cause } => {
            println!("{} {}", "✗".red(), cause.red());
        }
        StageResult::Terminal { status } => {
            println!("Run already finished: {}", colorize_status(*status));
        }
    }

    Ok(())
}

async fn cancel_run(client: &OrchestratorClient, id: &str) -> Result<()> {
    let run_id = resolve_run_id(client, id).await?;

    let run = match client.cancel_run(run_id).await {
        Ok(run) => run,
        Err(e) if e.is_conflict() => {
            anyhow::bail!("Run {} cannot be cancelled: {}", run_id, e);
        }
        Err(e) => return Err(e).context("Failed to cancel run"),
    };

    println!(
        "{} Run {} cancelled during {}",
        "✓".green(),
        run.id.to_string().cyan(),
        run.current_stage
    );

    Ok(())
}

fn print_run_summary(run: &RunSummary) {
    println!("  {} Run {}", "▸".cyan(), run.id.to_string().dimmed());
    println!("    Revision: {} ({})", run.revision_id, run.branch);
    println!(
        "    Status:   {} at {}",
        colorize_status(run.status),
        run.current_stage
    );
    if let Some(kind) = run.error_kind {
        println!("    Error:    {}", kind.to_string().red());
    }
    println!(
        "    Created:  {}",
        run.created_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    println!();
}

fn print_run_details(run: &PipelineRun) {
    println!("{}", "Run Details:".bold());
    println!("  ID:         {}", run.id.to_string().cyan());
    println!("  Revision:   {}", run.revision.id);
    println!("  Branch:     {}", run.revision.branch);
    println!("  Repository: {}", run.revision.repository.dimmed());
    println!("  Status:     {}", colorize_status(run.status));
    println!(
        "  Created:    {}",
        run.created_at.format("%Y-%m-%d %H:%M:%S")
    );

    if let Some(completed) = run.completed_at {
        println!("  Completed:  {}", completed.format("%Y-%m-%d %H:%M:%S"));

        if let Some(started) = run.started_at {
            let duration = completed.signed_duration_since(started);
            println!("  Duration:   {}s", duration.num_seconds());
        }
    }

    println!("\n{}", "Stages:".bold());
    for stage in &run.stages {
        let marker = if stage.name == run.current_stage && !run.is_terminal() {
            "▸".cyan()
        } else {
            " ".normal()
        };
        println!(
            "  {} {:<8} {}",
            marker,
            stage.name.to_string(),
            colorize_stage(stage.status)
        );
    }

    if let Some(failure) = &run.failure {
        println!("\n{}", "Error:".bold());
        println!("  Stage: {}", failure.stage);
        println!("  Kind:  {}", failure.kind);
        println!("  {}", failure.cause.red());
    }
}

/// Colorize run status for display
fn colorize_status(status: RunStatus) -> ColoredString {
    let status_str = status.to_string();
    match status {
        RunStatus::Pending => status_str.yellow(),
        RunStatus::Running => status_str.cyan(),
        RunStatus::WaitingApproval => status_str.magenta(),
        RunStatus::Succeeded => status_str.green(),
        RunStatus::Failed => status_str.red(),
        RunStatus::Rejected => status_str.red(),
        RunStatus::Cancelled => status_str.dimmed(),
    }
}

fn colorize_stage(status: StageStatus) -> ColoredString {
    let status_str = status.to_string();
    match status {
        StageStatus::Pending => status_str.dimmed(),
        StageStatus::Running => status_str.cyan(),
        StageStatus::WaitingApproval => status_str.magenta(),
        StageStatus::Succeeded => status_str.green(),
        StageStatus::Failed | StageStatus::Rejected => status_str.red(),
    }
}
