//! Deployment target command handlers

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;

use crate::config::Config;

/// Target subcommands
#[derive(Subcommand)]
pub enum TargetCommands {
    /// Show the desired state of a service
    Get {
        /// Service name
        service: String,
    },
}

pub async fn handle_target_command(command: TargetCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        TargetCommands::Get { service } => {
            let target = client
                .get_target(&service)
                .await
                .with_context(|| format!("Failed to fetch target '{}'", service))?;

            println!("{}", format!("Service {}", target.service).bold());
            println!(
                "  Updated: {}",
                target
                    .updated_at
                    .format("%Y-%m-%d %H:%M:%S")
                    .to_string()
                    .dimmed()
            );
            println!();

            if target.components.is_empty() {
                println!("{}", "No components.".yellow());
            }
            for (name, state) in &target.components {
                println!("  {} {}", "▸".cyan(), name.bold());
                println!("    Image:    {}", state.image_uri);
                println!("    Replicas: {}", state.replicas);
            }
        }
    }

    Ok(())
}
