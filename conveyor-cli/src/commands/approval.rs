//! Approval command handlers

use anyhow::{Context, Result};
use clap::Args;
use colored::*;
use conveyor_core::domain::approval::{ApprovalDecision, Decision};

use crate::config::Config;
use crate::id_resolver::resolve_run_id;

#[derive(Args)]
pub struct ApprovalArgs {
    /// Run ID or unambiguous prefix
    id: String,

    /// Who is deciding
    #[arg(short, long, env = "CONVEYOR_ACTOR")]
    actor: String,

    /// Optional note stored with the decision
    #[arg(short, long)]
    comment: Option<String>,
}

pub async fn handle_approve(args: ApprovalArgs, config: &Config) -> Result<()> {
    decide(args, Decision::Approve, config).await
}

pub async fn handle_reject(args: ApprovalArgs, config: &Config) -> Result<()> {
    decide(args, Decision::Reject, config).await
}

async fn decide(args: ApprovalArgs, decision: Decision, config: &Config) -> Result<()> {
    let client = config.client();
    let run_id = resolve_run_id(&client, &args.id).await?;

    let result = match decision {
        Decision::Approve => client.approve(run_id, &args.actor, args.comment).await,
        Decision::Reject => client.reject(run_id, &args.actor, args.comment).await,
    };

    let stored = match result {
        Ok(stored) => stored,
        Err(e) if e.is_conflict() => {
            anyhow::bail!("Run {} cannot take this decision: {}", run_id, e);
        }
        Err(e) => return Err(e).context("Failed to record decision"),
    };

    print_decision(&stored);
    Ok(())
}

fn print_decision(decision: &ApprovalDecision) {
    let label = match decision.decision {
        Decision::Approve => "✓ Approved".green().bold(),
        Decision::Reject => "✗ Rejected".red().bold(),
    };

    println!("{}", label);
    println!("  Run ID: {}", decision.run_id.to_string().cyan());
    println!("  Actor:  {}", decision.actor);
    if let Some(comment) = &decision.comment {
        println!("  Note:   {}", comment.dimmed());
    }
}
