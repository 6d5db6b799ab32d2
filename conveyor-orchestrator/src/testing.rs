//! Recording test doubles for the external collaborators
//!
//! Always compiled so integration tests and local experiments can wire a
//! controller without git, podman or a real cluster.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use conveyor_core::domain::revision::Revision;
use conveyor_core::domain::target::{ComponentUpdate, DeploymentTarget};

use crate::collaborators::{
    BuildFailure, BuildOutput, DeployRejection, ImageBuilder, LocalCluster, PushFailure,
    ResolveFailure, ServiceOrchestrator, SourceControl,
};

// =============================================================================
// Source Control
// =============================================================================

/// Resolves every revision to itself unless told to fail
#[derive(Clone, Default)]
pub struct FakeSource {
    resolved: Arc<Mutex<Vec<Revision>>>,
    failure: Arc<Mutex<Option<String>>>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later resolution fail with `reason`
    pub fn fail_with(&self, reason: impl Into<String>) {
        *self.failure.lock().unwrap_or_else(|e| e.into_inner()) = Some(reason.into());
    }

    /// Revisions resolved so far
    pub fn resolved(&self) -> Vec<Revision> {
        self.resolved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl SourceControl for FakeSource {
    async fn resolve(&self, revision: &Revision) -> Result<Revision, ResolveFailure> {
        if let Some(reason) = self
            .failure
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
        {
            return Err(ResolveFailure::new(reason));
        }

        self.resolved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(revision.clone());
        Ok(revision.clone())
    }
}

// =============================================================================
// Image Builder
// =============================================================================

/// Recorded builder call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuilderCall {
    Build { revision_id: String, image_uri: String },
    Push { image_uri: String },
}

#[derive(Default)]
struct BuilderBehavior {
    build_failure: Option<BuildFailure>,
    failing_pushes: u32,
    push_failure: Option<PushFailure>,
    build_delay: Option<Duration>,
    push_delay: Option<Duration>,
}

/// Builder that records calls and fails on demand
#[derive(Clone, Default)]
pub struct FakeBuilder {
    calls: Arc<Mutex<Vec<BuilderCall>>>,
    behavior: Arc<Mutex<BuilderBehavior>>,
}

impl FakeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every build exit with `exit_status`
    pub fn fail_builds(&self, exit_status: i32) {
        self.behavior().build_failure = Some(BuildFailure {
            exit_status: Some(exit_status),
            logs_ref: "fake://build.log".to_string(),
        });
    }

    /// Fail the next `count` pushes with `failure`
    pub fn fail_pushes(&self, count: u32, failure: PushFailure) {
        let mut behavior = self.behavior();
        behavior.failing_pushes = count;
        behavior.push_failure = Some(failure);
    }

    pub fn delay_builds(&self, delay: Duration) {
        self.behavior().build_delay = Some(delay);
    }

    pub fn delay_pushes(&self, delay: Duration) {
        self.behavior().push_delay = Some(delay);
    }

    pub fn calls(&self) -> Vec<BuilderCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn push_attempts(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, BuilderCall::Push { .. }))
            .count()
    }

    fn behavior(&self) -> std::sync::MutexGuard<'_, BuilderBehavior> {
        self.behavior.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, call: BuilderCall) {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call);
    }
}

#[async_trait]
impl ImageBuilder for FakeBuilder {
    async fn build(
        &self,
        revision: &Revision,
        image_uri: &str,
    ) -> Result<BuildOutput, BuildFailure> {
        self.record(BuilderCall::Build {
            revision_id: revision.id.clone(),
            image_uri: image_uri.to_string(),
        });

        let (delay, failure) = {
            let behavior = self.behavior();
            (behavior.build_delay, behavior.build_failure.clone())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match failure {
            Some(failure) => Err(failure),
            None => Ok(BuildOutput {
                logs_ref: "fake://build.log".to_string(),
            }),
        }
    }

    async fn push(&self, image_uri: &str) -> Result<(), PushFailure> {
        self.record(BuilderCall::Push {
            image_uri: image_uri.to_string(),
        });

        let (delay, failure) = {
            let mut behavior = self.behavior();
            let failure = if behavior.failing_pushes > 0 {
                behavior.failing_pushes -= 1;
                behavior.push_failure.clone()
            } else {
                None
            };
            (behavior.push_delay, failure)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match failure {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }
}

// =============================================================================
// Service Orchestrator
// =============================================================================

/// Whether a recorded event marks the start or the end of an update request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    Begin,
    End,
}

/// Recorded update request event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployEvent {
    pub service: String,
    pub component: String,
    pub image_uri: String,
    pub phase: RequestPhase,
}

/// Orchestrator that records every update request and applies it to a [`LocalCluster`]
#[derive(Clone)]
pub struct RecordingOrchestrator {
    cluster: LocalCluster,
    events: Arc<Mutex<Vec<DeployEvent>>>,
    delay: Arc<Mutex<Option<Duration>>>,
}

impl RecordingOrchestrator {
    pub fn new(target: DeploymentTarget) -> Self {
        Self {
            cluster: LocalCluster::with_target(target),
            events: Arc::new(Mutex::new(Vec::new())),
            delay: Arc::new(Mutex::new(None)),
        }
    }

    /// Hold every request open for `delay` between its begin and end events
    pub fn delay_requests(&self, delay: Duration) {
        *self.delay.lock().unwrap_or_else(|e| e.into_inner()) = Some(delay);
    }

    pub fn events(&self) -> Vec<DeployEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Update requests in the order they were issued
    pub fn requests(&self) -> Vec<DeployEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.phase == RequestPhase::Begin)
            .collect()
    }

    pub fn cluster(&self) -> &LocalCluster {
        &self.cluster
    }

    fn record(&self, service: &str, component: &str, image_uri: &str, phase: RequestPhase) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(DeployEvent {
                service: service.to_string(),
                component: component.to_string(),
                image_uri: image_uri.to_string(),
                phase,
            });
    }
}

#[async_trait]
impl ServiceOrchestrator for RecordingOrchestrator {
    async fn update_service_component(
        &self,
        service: &str,
        component: &str,
        image_uri: &str,
    ) -> Result<ComponentUpdate, DeployRejection> {
        self.record(service, component, image_uri, RequestPhase::Begin);

        let delay = *self.delay.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let result = self
            .cluster
            .update_service_component(service, component, image_uri)
            .await;

        self.record(service, component, image_uri, RequestPhase::End);
        result
    }

    async fn describe_service(
        &self,
        service: &str,
    ) -> Result<Option<DeploymentTarget>, DeployRejection> {
        self.cluster.describe_service(service).await
    }
}
