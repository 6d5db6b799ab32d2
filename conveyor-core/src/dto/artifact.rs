//! Artifact DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::artifact::Artifact;
use crate::domain::run::StageName;

/// Artifact metadata without its content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactSummary {
    pub stage: StageName,
    pub name: String,
    pub content_type: String,
    pub sequence: u32,
    pub size: usize,
    pub sealed_at: DateTime<Utc>,
}

impl From<&Artifact> for ArtifactSummary {
    fn from(artifact: &Artifact) -> Self {
        Self {
            stage: artifact.key.stage,
            name: artifact.key.name.clone(),
            content_type: artifact.content_type.clone(),
            sequence: artifact.sequence,
            size: artifact.size(),
            sealed_at: artifact.sealed_at,
        }
    }
}
