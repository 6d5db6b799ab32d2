//! Source revision domain types

use serde::{Deserialize, Serialize};

/// A unit of source code observed on a branch
///
/// Produced by the source stage. Once the stage has resolved `id` it is never
/// changed again; later stages only read it from the source artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Revision {
    /// Commit-like identifier
    pub id: String,
    /// Source location the revision belongs to
    pub repository: String,
    /// Branch the revision was pushed to
    pub branch: String,
}

impl Revision {
    pub fn new(
        id: impl Into<String>,
        repository: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            repository: repository.into(),
            branch: branch.into(),
        }
    }

    /// First twelve characters of the identifier, for display
    pub fn short_id(&self) -> &str {
        match self.id.char_indices().nth(12) {
            Some((idx, _)) => &self.id[..idx],
            None => &self.id,
        }
    }

    /// Copy of this revision with a resolved identifier
    pub fn resolved(&self, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..self.clone()
        }
    }
}

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.branch, self.short_id())
    }
}

/// Longest revision id accepted from a push
pub const MAX_REVISION_LENGTH: usize = 64;

/// Validate a pushed revision id and lower-case it
///
/// Two pushes of the same commit must map to the same id, whatever their
/// casing or surrounding whitespace.
pub fn normalize_revision_id(id: &str) -> Result<String, String> {
    let id = id.trim();
    if id.is_empty() {
        return Err("revision id cannot be empty".to_string());
    }
    if id.len() > MAX_REVISION_LENGTH {
        return Err(format!(
            "revision id is too long (max {} characters)",
            MAX_REVISION_LENGTH
        ));
    }
    if !id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(format!("revision id '{}' contains invalid characters", id));
    }
    Ok(id.to_ascii_lowercase())
}

/// Push notification from the source-control collaborator
///
/// Only the branch and the pushed id are taken from the notification. The
/// repository always comes from the pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushEvent {
    pub branch: String,
    pub revision_id: String,
}

impl PushEvent {
    pub fn new(branch: impl Into<String>, revision_id: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            revision_id: revision_id.into(),
        }
    }

    /// Turn the notification into an (unresolved) revision of `repository`
    pub fn into_revision(self, repository: &str) -> Revision {
        Revision {
            id: self.revision_id,
            repository: repository.to_string(),
            branch: self.branch,
        }
    }
}
