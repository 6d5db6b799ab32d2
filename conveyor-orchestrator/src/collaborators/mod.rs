//! External collaborators
//!
//! The pipeline never talks to source control, the build toolchain, the
//! registry or the running service directly. Stages call these traits, and the
//! binary wires in real implementations while tests use the recording fakes
//! from the `testing` module.

pub mod cluster;
pub mod git;
pub mod http;
pub mod podman;

use std::ffi::OsStr;

use async_trait::async_trait;
use conveyor_core::domain::revision::Revision;
use conveyor_core::domain::target::{ComponentUpdate, DeploymentTarget};
use thiserror::Error;
use tokio::process::Command;

pub use cluster::LocalCluster;
pub use git::{GitRemoteSource, PassthroughSource};
pub use http::HttpOrchestrator;
pub use podman::PodmanBuilder;

/// External process that is killed when its future is dropped
///
/// Stage timeouts drop the future running the command; the child must not
/// outlive it.
pub(crate) fn command(program: impl AsRef<OsStr>) -> Command {
    let mut command = Command::new(program);
    command.kill_on_drop(true);
    command
}

/// Source control could not pin the revision
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct ResolveFailure {
    pub reason: String,
}

impl ResolveFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Successful image build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutput {
    /// Where the build output can be read (file path, URL, ...)
    pub logs_ref: String,
}

/// The external build process exited unsuccessfully
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("build failed (exit status {exit_status:?}, logs: {logs_ref})")]
pub struct BuildFailure {
    pub exit_status: Option<i32>,
    pub logs_ref: String,
}

/// Why a registry push failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PushFailure {
    #[error("registry authentication failed: {0}")]
    Auth(String),

    #[error("registry unreachable: {0}")]
    Network(String),
}

/// The orchestrator refused an update request
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct DeployRejection {
    pub reason: String,
}

impl DeployRejection {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Pin a pushed revision to an immutable identifier
    async fn resolve(&self, revision: &Revision) -> Result<Revision, ResolveFailure>;
}

#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Build `revision` into a local image tagged `image_uri`
    async fn build(&self, revision: &Revision, image_uri: &str)
    -> Result<BuildOutput, BuildFailure>;

    /// Push a previously built image to its registry
    async fn push(&self, image_uri: &str) -> Result<(), PushFailure>;
}

#[async_trait]
pub trait ServiceOrchestrator: Send + Sync {
    /// Set the desired image of one component, leaving everything else as is
    ///
    /// Returns once the request is accepted; convergence is not awaited.
    async fn update_service_component(
        &self,
        service: &str,
        component: &str,
        image_uri: &str,
    ) -> Result<ComponentUpdate, DeployRejection>;

    /// Current desired state of a service, if the orchestrator knows it
    async fn describe_service(
        &self,
        service: &str,
    ) -> Result<Option<DeploymentTarget>, DeployRejection>;
}
