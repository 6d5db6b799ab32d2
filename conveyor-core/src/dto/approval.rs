//! Approval DTOs

use serde::{Deserialize, Serialize};

use crate::domain::approval::Decision;

/// Request to record the approval decision for a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordApproval {
    pub actor: String,
    pub decision: Decision,
    #[serde(default)]
    pub comment: Option<String>,
}
