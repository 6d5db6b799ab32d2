//! Trigger DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What happened to a push notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PushOutcome {
    /// A new run was created for the pushed revision
    Started { run_id: Uuid },
    /// The push was on a branch the pipeline does not watch
    Ignored { branch: String },
}
