//! In-process cluster
//!
//! Holds deployment targets in memory and applies update requests the way a
//! container orchestrator would accept them: only known components, only
//! well-formed image references, replica counts untouched.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use conveyor_core::domain::manifest::validate_image_uri;
use conveyor_core::domain::target::{ComponentUpdate, DeploymentTarget};
use tokio::sync::RwLock;
use tracing::info;

use super::{DeployRejection, ServiceOrchestrator};

#[derive(Debug, Clone, Default)]
pub struct LocalCluster {
    targets: Arc<RwLock<HashMap<String, DeploymentTarget>>>,
}

impl LocalCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cluster that already runs `target`
    pub fn with_target(target: DeploymentTarget) -> Self {
        let mut targets = HashMap::new();
        targets.insert(target.service.clone(), target);
        Self {
            targets: Arc::new(RwLock::new(targets)),
        }
    }

    /// Add or replace a running service
    pub async fn register(&self, target: DeploymentTarget) {
        self.targets
            .write()
            .await
            .insert(target.service.clone(), target);
    }
}

#[async_trait]
impl ServiceOrchestrator for LocalCluster {
    async fn update_service_component(
        &self,
        service: &str,
        component: &str,
        image_uri: &str,
    ) -> Result<ComponentUpdate, DeployRejection> {
        validate_image_uri(image_uri).map_err(DeployRejection::new)?;

        let mut targets = self.targets.write().await;
        let target = targets
            .get_mut(service)
            .ok_or_else(|| DeployRejection::new(format!("unknown service '{}'", service)))?;

        let state = target.components.get_mut(component).ok_or_else(|| {
            DeployRejection::new(format!(
                "service '{}' has no component '{}'",
                service, component
            ))
        })?;

        let previous = std::mem::replace(&mut state.image_uri, image_uri.to_string());
        target.updated_at = Utc::now();

        info!(
            "Service {} component {} desired image {} -> {}",
            service, component, previous, image_uri
        );

        Ok(ComponentUpdate {
            component: component.to_string(),
            image_uri: image_uri.to_string(),
            previous_image_uri: Some(previous),
        })
    }

    async fn describe_service(
        &self,
        service: &str,
    ) -> Result<Option<DeploymentTarget>, DeployRejection> {
        Ok(self.targets.read().await.get(service).cloned())
    }
}
