//! Orchestrator configuration
//!
//! Defines the pipeline definition (what to watch, build and deploy) and the
//! server settings around it. Everything is read from environment variables so
//! the same binary can be pointed at different services.

use anyhow::{Context, Result};
use conveyor_core::domain::manifest::TagPolicy;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Pipeline definition
///
/// Credentials are an opaque reference handed to the collaborators; the core
/// never reads or stores secret material itself.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Source location (e.g., "https://github.com/acme/app.git")
    pub source_repository: String,

    /// Only pushes to this branch start runs
    pub target_branch: String,

    /// Reference to externally stored credentials used by source and build collaborators
    pub credentials_ref: Option<String>,

    /// Registry repository images are pushed to, without a tag
    pub registry_repository: String,

    /// Name of the running service the deploy stage updates
    pub service: String,

    /// Deployable component names; one manifest entry is produced per component
    pub components: Vec<String>,

    /// How built images are tagged
    pub tag_policy: TagPolicy,

    /// Bound on the external build call and on each registry push
    pub build_timeout: Duration,

    /// Bound on each update request sent to the external orchestrator
    pub deploy_timeout: Duration,

    /// Runs waiting for approval longer than this are failed; None waits forever
    pub approval_timeout: Option<Duration>,

    /// Extra push attempts after the first one fails
    pub push_retries: u32,
}

impl PipelineConfig {
    /// Creates a pipeline definition with defaults for everything optional
    pub fn new(
        source_repository: impl Into<String>,
        registry_repository: impl Into<String>,
        service: impl Into<String>,
        tag_policy: TagPolicy,
    ) -> Self {
        let service = service.into();
        Self {
            source_repository: source_repository.into(),
            target_branch: "main".to_string(),
            credentials_ref: None,
            registry_repository: registry_repository.into(),
            components: vec![service.clone()],
            service,
            tag_policy,
            build_timeout: Duration::from_secs(1800), // 30 minutes
            deploy_timeout: Duration::from_secs(60),
            approval_timeout: None,
            push_retries: 1,
        }
    }

    pub fn with_target_branch(mut self, branch: impl Into<String>) -> Self {
        self.target_branch = branch.into();
        self
    }

    pub fn with_components(mut self, components: Vec<String>) -> Self {
        self.components = components;
        self
    }

    pub fn with_approval_timeout(mut self, timeout: Duration) -> Self {
        self.approval_timeout = Some(timeout);
        self
    }

    pub fn with_timeouts(mut self, build: Duration, deploy: Duration) -> Self {
        self.build_timeout = build;
        self.deploy_timeout = deploy;
        self
    }

    /// Creates the pipeline definition from environment variables
    ///
    /// Expected environment variables:
    /// - CONVEYOR_SOURCE_REPOSITORY (required)
    /// - CONVEYOR_REGISTRY_REPOSITORY (required)
    /// - CONVEYOR_SERVICE (required)
    /// - CONVEYOR_TAG_POLICY (required, "revision" or "fixed:<tag>")
    /// - CONVEYOR_TARGET_BRANCH (optional, default: main)
    /// - CONVEYOR_CREDENTIALS_REF (optional)
    /// - CONVEYOR_COMPONENTS (optional, comma separated, default: the service name)
    /// - CONVEYOR_BUILD_TIMEOUT (optional, seconds, default: 1800)
    /// - CONVEYOR_DEPLOY_TIMEOUT (optional, seconds, default: 60)
    /// - CONVEYOR_APPROVAL_TIMEOUT (optional, seconds, default: none)
    /// - CONVEYOR_PUSH_RETRIES (optional, default: 1)
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Same as [`PipelineConfig::from_env`] with an explicit variable lookup
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| anyhow::anyhow!("{} environment variable not set", key))
        };

        let tag_policy = required("CONVEYOR_TAG_POLICY")?
            .parse::<TagPolicy>()
            .map_err(|e| anyhow::anyhow!(e))
            .context("Invalid CONVEYOR_TAG_POLICY")?;

        let mut config = Self::new(
            required("CONVEYOR_SOURCE_REPOSITORY")?,
            required("CONVEYOR_REGISTRY_REPOSITORY")?,
            required("CONVEYOR_SERVICE")?,
            tag_policy,
        );

        if let Some(branch) = lookup("CONVEYOR_TARGET_BRANCH") {
            config.target_branch = branch.trim().to_string();
        }

        config.credentials_ref = lookup("CONVEYOR_CREDENTIALS_REF").filter(|v| !v.is_empty());

        if let Some(components) = lookup("CONVEYOR_COMPONENTS") {
            config.components = components
                .split(',')
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .collect();
        }

        config.build_timeout = seconds(&lookup, "CONVEYOR_BUILD_TIMEOUT").unwrap_or(config.build_timeout);
        config.deploy_timeout =
            seconds(&lookup, "CONVEYOR_DEPLOY_TIMEOUT").unwrap_or(config.deploy_timeout);
        config.approval_timeout = seconds(&lookup, "CONVEYOR_APPROVAL_TIMEOUT");

        config.push_retries = lookup("CONVEYOR_PUSH_RETRIES")
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(config.push_retries);

        Ok(config)
    }

    /// Validates the pipeline definition
    pub fn validate(&self) -> Result<()> {
        const MAX_PUSH_RETRIES: u32 = 5;

        if self.source_repository.trim().is_empty() {
            anyhow::bail!("source_repository cannot be empty");
        }

        if self.target_branch.is_empty() {
            anyhow::bail!("target_branch cannot be empty");
        }

        if self.registry_repository.trim().is_empty() {
            anyhow::bail!("registry_repository cannot be empty");
        }

        let last_segment = self
            .registry_repository
            .rsplit('/')
            .next()
            .unwrap_or_default();
        if last_segment.contains(':') || self.registry_repository.contains('@') {
            anyhow::bail!("registry_repository must not include a tag or digest");
        }

        if self.service.trim().is_empty() {
            anyhow::bail!("service cannot be empty");
        }

        if self.components.is_empty() {
            anyhow::bail!("at least one component is required");
        }

        let mut seen = HashSet::new();
        for component in &self.components {
            if component.trim().is_empty() {
                anyhow::bail!("component names cannot be empty");
            }
            if !seen.insert(component.as_str()) {
                anyhow::bail!("component '{}' is listed more than once", component);
            }
        }

        if self.build_timeout.is_zero() {
            anyhow::bail!("build_timeout must be greater than 0");
        }

        if self.deploy_timeout.is_zero() {
            anyhow::bail!("deploy_timeout must be greater than 0");
        }

        if self.approval_timeout.is_some_and(|t| t.is_zero()) {
            anyhow::bail!("approval_timeout must be greater than 0 when set");
        }

        if self.push_retries > MAX_PUSH_RETRIES {
            anyhow::bail!("push_retries cannot exceed {}", MAX_PUSH_RETRIES);
        }

        Ok(())
    }
}

/// Which source-control collaborator resolves pushed revisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverKind {
    /// Trust the pushed revision id after validating its shape
    Passthrough,
    /// Ask the remote with `git ls-remote`
    Git,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the HTTP API listens on
    pub bind_addr: String,

    /// Postgres URL; runs and artifacts are kept in memory when unset
    pub database_url: Option<String>,

    /// Directory builds check sources out into
    pub workspace: PathBuf,

    /// Build context directory inside the checked out source
    pub build_context: String,

    /// Base URL of an HTTP orchestrator; an in-process cluster is used when unset
    pub orchestrator_endpoint: Option<String>,

    pub source_resolver: ResolverKind,

    /// How often runs waiting for approval are checked against the approval timeout
    pub approval_check_interval: Duration,

    pub pipeline: PipelineConfig,
}

impl ServerConfig {
    /// Creates the server configuration from environment variables
    ///
    /// Expected environment variables, in addition to the pipeline ones:
    /// - ORCHESTRATOR_BIND_ADDR (optional, default: 0.0.0.0:8080)
    /// - DATABASE_URL (optional)
    /// - CONVEYOR_WORKSPACE (optional, default: /var/lib/conveyor/workspace)
    /// - CONVEYOR_BUILD_CONTEXT (optional, default: src)
    /// - CONVEYOR_ORCHESTRATOR_ENDPOINT (optional)
    /// - CONVEYOR_SOURCE_RESOLVER (optional, "passthrough" or "git", default: passthrough)
    /// - CONVEYOR_APPROVAL_CHECK_INTERVAL (optional, seconds, default: 30)
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Same as [`ServerConfig::from_env`] with an explicit variable lookup
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let pipeline = PipelineConfig::from_vars(&lookup)?;

        let source_resolver = match lookup("CONVEYOR_SOURCE_RESOLVER").as_deref() {
            None | Some("passthrough") => ResolverKind::Passthrough,
            Some("git") => ResolverKind::Git,
            Some(other) => anyhow::bail!(
                "Invalid CONVEYOR_SOURCE_RESOLVER '{}' (expected 'passthrough' or 'git')",
                other
            ),
        };

        Ok(Self {
            bind_addr: lookup("ORCHESTRATOR_BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            database_url: lookup("DATABASE_URL").filter(|v| !v.is_empty()),
            workspace: lookup("CONVEYOR_WORKSPACE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/var/lib/conveyor/workspace")),
            build_context: lookup("CONVEYOR_BUILD_CONTEXT").unwrap_or_else(|| "src".to_string()),
            orchestrator_endpoint: lookup("CONVEYOR_ORCHESTRATOR_ENDPOINT").filter(|v| !v.is_empty()),
            source_resolver,
            approval_check_interval: seconds(&lookup, "CONVEYOR_APPROVAL_CHECK_INTERVAL")
                .unwrap_or(Duration::from_secs(30)),
            pipeline,
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        self.pipeline.validate()?;

        if self.bind_addr.is_empty() {
            anyhow::bail!("bind_addr cannot be empty");
        }

        if let Some(endpoint) = &self.orchestrator_endpoint {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                anyhow::bail!("orchestrator_endpoint must start with http:// or https://");
            }
        }

        if self.approval_check_interval.is_zero() {
            anyhow::bail!("approval_check_interval must be greater than 0");
        }

        Ok(())
    }
}

fn seconds(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Duration> {
    lookup(key)
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
}
