//! Error taxonomy for pipeline stages

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Kind of failure recorded on a run
///
/// This is what status queries report alongside a human-readable cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    BranchMismatch,
    SourceResolve,
    BuildFailed,
    RegistryPush,
    Rejected,
    DeployRequest,
    Timeout,
    AlreadyDecided,
    DuplicateRun,
    Cancelled,
    Artifact,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::BranchMismatch => "branch_mismatch",
            ErrorKind::SourceResolve => "source_resolve",
            ErrorKind::BuildFailed => "build_failed",
            ErrorKind::RegistryPush => "registry_push",
            ErrorKind::Rejected => "rejected",
            ErrorKind::DeployRequest => "deploy_request",
            ErrorKind::Timeout => "timeout",
            ErrorKind::AlreadyDecided => "already_decided",
            ErrorKind::DuplicateRun => "duplicate_run",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Artifact => "artifact",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a stage did not produce its output
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    /// Push on a branch other than the configured target
    #[error("push on branch '{actual}' does not match target branch '{expected}'")]
    BranchMismatch { expected: String, actual: String },

    /// Revision could not be resolved to an immutable identifier
    #[error("failed to resolve revision '{revision}': {reason}")]
    SourceResolve { revision: String, reason: String },

    /// External build process failed
    #[error("{}", build_failed_message(.exit_status, .logs_ref))]
    BuildFailed {
        exit_status: Option<i32>,
        logs_ref: String,
    },

    /// Registry push failed after exhausting the retry budget
    #[error("push of {image_uri} failed after {attempts} attempt(s): {reason}")]
    RegistryPush {
        image_uri: String,
        attempts: u32,
        reason: String,
    },

    /// A human rejected the run at the approval gate
    #[error("{}", rejected_message(.actor, .comment))]
    Rejected {
        actor: String,
        comment: Option<String>,
    },

    /// The external orchestrator refused an update request
    #[error("update of component '{component}' to '{image_uri}' was rejected: {reason}")]
    DeployRequest {
        component: String,
        image_uri: String,
        reason: String,
    },

    /// An external call exceeded its configured bound
    #[error("{operation} timed out after {}s", .after.as_secs())]
    Timeout { operation: String, after: Duration },

    /// An input artifact is missing or cannot be decoded
    #[error("artifact '{name}' is unusable: {reason}")]
    Artifact { name: String, reason: String },
}

impl StageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StageError::BranchMismatch { .. } => ErrorKind::BranchMismatch,
            StageError::SourceResolve { .. } => ErrorKind::SourceResolve,
            StageError::BuildFailed { .. } => ErrorKind::BuildFailed,
            StageError::RegistryPush { .. } => ErrorKind::RegistryPush,
            StageError::Rejected { .. } => ErrorKind::Rejected,
            StageError::DeployRequest { .. } => ErrorKind::DeployRequest,
            StageError::Timeout { .. } => ErrorKind::Timeout,
            StageError::Artifact { .. } => ErrorKind::Artifact,
        }
    }

    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        StageError::Timeout {
            operation: operation.into(),
            after,
        }
    }

    pub fn artifact(name: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        StageError::Artifact {
            name: name.into(),
            reason: reason.to_string(),
        }
    }
}

fn build_failed_message(exit_status: &Option<i32>, logs_ref: &str) -> String {
    match exit_status {
        Some(code) => format!("build failed with exit status {} (logs: {})", code, logs_ref),
        None => format!("build failed without an exit status (logs: {})", logs_ref),
    }
}

fn rejected_message(actor: &str, comment: &Option<String>) -> String {
    match comment {
        Some(comment) => format!("rejected by {}: {}", actor, comment),
        None => format!("rejected by {}", actor),
    }
}
