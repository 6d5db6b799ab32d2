//! HTTP orchestrator client
//!
//! Talks to an external container orchestrator that exposes
//! `PUT {base}/services/{service}/components/{name}/image` and
//! `GET {base}/services/{service}`.

use async_trait::async_trait;
use conveyor_core::domain::target::{ComponentUpdate, DeploymentTarget};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::{debug, info};

use super::{DeployRejection, ServiceOrchestrator};

#[derive(Debug, Clone)]
pub struct HttpOrchestrator {
    /// Base URL of the orchestrator (e.g., "http://cluster.internal:9000")
    base_url: String,
    client: Client,
}

#[derive(Serialize)]
struct ImageUpdateRequest<'a> {
    #[serde(rename = "imageUri")]
    image_uri: &'a str,
}

impl HttpOrchestrator {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn component_url(&self, service: &str, component: &str) -> String {
        format!(
            "{}/services/{}/components/{}/image",
            self.base_url, service, component
        )
    }
}

#[async_trait]
impl ServiceOrchestrator for HttpOrchestrator {
    async fn update_service_component(
        &self,
        service: &str,
        component: &str,
        image_uri: &str,
    ) -> Result<ComponentUpdate, DeployRejection> {
        let url = self.component_url(service, component);
        debug!("PUT {}", url);

        let response = self
            .client
            .put(&url)
            .json(&ImageUpdateRequest { image_uri })
            .send()
            .await
            .map_err(|e| DeployRejection::new(format!("request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(DeployRejection::new(format!(
                "orchestrator answered {}: {}",
                status.as_u16(),
                body.trim()
            )));
        }

        info!("Orchestrator accepted {} for {}/{}", image_uri, service, component);
        Ok(ComponentUpdate {
            component: component.to_string(),
            image_uri: image_uri.to_string(),
            previous_image_uri: None,
        })
    }

    async fn describe_service(
        &self,
        service: &str,
    ) -> Result<Option<DeploymentTarget>, DeployRejection> {
        let url = format!("{}/services/{}", self.base_url, service);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| DeployRejection::new(format!("request to {} failed: {}", url, e)))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response
                .json()
                .await
                .map(Some)
                .map_err(|e| DeployRejection::new(format!("invalid service description: {}", e))),
            status => Err(DeployRejection::new(format!(
                "orchestrator answered {}",
                status.as_u16()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_url() {
        let orchestrator = HttpOrchestrator::new("http://cluster.internal:9000/");
        assert_eq!(orchestrator.base_url(), "http://cluster.internal:9000");
        assert_eq!(
            orchestrator.component_url("web", "app"),
            "http://cluster.internal:9000/services/web/components/app/image"
        );
    }

    #[test]
    fn test_update_body_uses_manifest_field_name() {
        let body = serde_json::to_string(&ImageUpdateRequest {
            image_uri: "registry/repo:v1",
        })
        .unwrap();
        assert_eq!(body, r#"{"imageUri":"registry/repo:v1"}"#);
    }
}
