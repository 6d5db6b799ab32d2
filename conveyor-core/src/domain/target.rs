//! Deployment target domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Desired state of one component of a running service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentState {
    pub image_uri: String,
    pub replicas: u32,
}

/// Desired state of a running service, as held by the external orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentTarget {
    pub service: String,
    pub components: BTreeMap<String, ComponentState>,
    pub updated_at: DateTime<Utc>,
}

impl DeploymentTarget {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            components: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }

    /// Add a component with its initial image and replica count
    pub fn with_component(
        mut self,
        name: impl Into<String>,
        image_uri: impl Into<String>,
        replicas: u32,
    ) -> Self {
        self.components.insert(
            name.into(),
            ComponentState {
                image_uri: image_uri.into(),
                replicas,
            },
        );
        self
    }

    pub fn desired_image(&self, component: &str) -> Option<&str> {
        self.components
            .get(component)
            .map(|state| state.image_uri.as_str())
    }
}

/// One accepted update request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentUpdate {
    pub component: String,
    pub image_uri: String,
    pub previous_image_uri: Option<String>,
}

/// What the deploy stage changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentResult {
    pub service: String,
    pub updates: Vec<ComponentUpdate>,
}
