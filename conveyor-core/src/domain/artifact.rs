//! Artifact domain types
//!
//! Artifacts are write-once blobs passed from one stage to the next. They are
//! addressed by `(run_id, stage, name)` and never change after being sealed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::run::StageName;

/// Address of an artifact inside the store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactKey {
    pub run_id: Uuid,
    pub stage: StageName,
    pub name: String,
}

impl ArtifactKey {
    pub fn new(run_id: Uuid, stage: StageName, name: impl Into<String>) -> Self {
        Self {
            run_id,
            stage,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.run_id, self.stage, self.name)
    }
}

/// Artifact content produced by a stage, before it is sealed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewArtifact {
    pub name: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

impl NewArtifact {
    pub fn json(name: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            content_type: "application/json".to_string(),
            content,
        }
    }
}

/// A sealed artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub key: ArtifactKey,
    pub content_type: String,
    /// Position of this artifact within its run, starting at 1
    pub sequence: u32,
    pub sealed_at: DateTime<Utc>,
    pub content: Vec<u8>,
}

impl Artifact {
    pub fn size(&self) -> usize {
        self.content.len()
    }
}
