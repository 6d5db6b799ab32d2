//! Service Module
//!
//! Business logic layer for the orchestrator. The controller sequences stages
//! over the repositories; the driver and sweeper run it in the background.

pub mod controller;
pub mod driver;

pub use controller::{Collaborators, PipelineController, PipelineError};
pub use driver::{ApprovalSweeper, drive, spawn_drive};
