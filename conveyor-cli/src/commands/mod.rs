//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod approval;
mod push;
mod run;
mod target;

pub use approval::ApprovalArgs;
pub use push::PushArgs;
pub use run::RunCommands;
pub use target::TargetCommands;

use anyhow::Result;
use clap::Subcommand;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Notify the orchestrator of a push
    Push(PushArgs),
    /// Inspect and control pipeline runs
    Run {
        #[command(subcommand)]
        command: RunCommands,
    },
    /// Approve a run waiting at the approval gate
    Approve(ApprovalArgs),
    /// Reject a run waiting at the approval gate
    Reject(ApprovalArgs),
    /// Inspect deployment targets
    Target {
        #[command(subcommand)]
        command: TargetCommands,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Push(args) => push::handle_push(args, config).await,
        Commands::Run { command } => run::handle_run_command(command, config).await,
        Commands::Approve(args) => approval::handle_approve(args, config).await,
        Commands::Reject(args) => approval::handle_reject(args, config).await,
        Commands::Target { command } => target::handle_target_command(command, config).await,
    }
}
