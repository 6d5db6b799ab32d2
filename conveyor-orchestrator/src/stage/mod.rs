//! Pipeline stages
//!
//! Each stage reads the artifacts it declares as inputs and either produces new
//! artifacts or fails with a [`StageError`]. Stages never touch run state; the
//! controller turns their results into transitions.

pub mod approval;
pub mod build;
pub mod deploy;
pub mod source;

use conveyor_core::domain::artifact::{Artifact, NewArtifact};
use conveyor_core::error::StageError;
use serde::de::DeserializeOwned;

pub use approval::ApprovalGate;
pub use build::BuildStage;
pub use deploy::DeployStage;
pub use source::SourceStage;

/// What a stage hands back to the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutput {
    /// Artifacts to seal before the run moves on
    Produced(Vec<NewArtifact>),
    /// The run waits at the approval gate
    Suspend,
}

/// Find the artifact called `name` among a stage's inputs
pub(crate) fn input<'a>(inputs: &'a [Artifact], name: &str) -> Result<&'a Artifact, StageError> {
    inputs
        .iter()
        .find(|artifact| artifact.key.name == name)
        .ok_or_else(|| StageError::artifact(name, "missing input"))
}

/// Decode a JSON input artifact
pub(crate) fn decode<T: DeserializeOwned>(artifact: &Artifact) -> Result<T, StageError> {
    serde_json::from_slice(&artifact.content)
        .map_err(|e| StageError::artifact(&artifact.key.name, e))
}

/// Encode a value as a JSON artifact
pub(crate) fn encode<T: serde::Serialize>(name: &str, value: &T) -> Result<NewArtifact, StageError> {
    serde_json::to_vec(value)
        .map(|content| NewArtifact::json(name, content))
        .map_err(|e| StageError::artifact(name, e))
}
