//! Push command handler

use anyhow::{Context, Result};
use clap::Args;
use colored::*;
use conveyor_core::domain::revision::PushEvent;
use conveyor_core::dto::trigger::PushOutcome;

use crate::config::Config;

#[derive(Args)]
pub struct PushArgs {
    /// Revision identifier that was pushed
    revision: String,

    /// Branch the revision was pushed to
    #[arg(short, long, default_value = "main")]
    branch: String,
}

pub async fn handle_push(args: PushArgs, config: &Config) -> Result<()> {
    let client = config.client();

    let event = PushEvent::new(args.branch, args.revision);

    let outcome = client
        .push(event)
        .await
        .context("Failed to send push notification")?;

    match outcome {
        PushOutcome::Started { run_id } => {
            println!("{}", "✓ Run started".green().bold());
            println!("  Run ID: {}", run_id.to_string().cyan());
        }
        PushOutcome::Ignored { branch } => {
            println!(
                "{}",
                format!("Push on '{}' ignored: not the target branch", branch).yellow()
            );
        }
    }

    Ok(())
}
