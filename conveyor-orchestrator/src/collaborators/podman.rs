//! Podman image builder
//!
//! Builds images on the orchestrator host:
//! - Checking podman availability
//! - Checking out the revision into the workspace
//! - Running `podman build` for the configured context directory
//! - Pushing the result with `podman push`
//!
//! Build output is written next to the checkout and its path is the logs reference.

use anyhow::{Context, Result};
use async_trait::async_trait;
use conveyor_core::domain::revision::Revision;
use std::path::{Path, PathBuf};
use std::process::Command as StdCommand;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use super::{BuildFailure, BuildOutput, ImageBuilder, PushFailure};

/// Checks if podman is installed and available
pub fn check_podman_available() -> Result<()> {
    let output = StdCommand::new("podman")
        .arg("--version")
        .output()
        .context("Failed to execute 'podman --version'. Is podman installed?")?;

    if !output.status.success() {
        anyhow::bail!("Podman is not working correctly");
    }

    let version = String::from_utf8_lossy(&output.stdout);
    info!("Podman is available: {}", version.trim());

    Ok(())
}

pub struct PodmanBuilder {
    workspace: PathBuf,
    build_context: String,

    /// Passed to `podman push --authfile`; never read by the builder itself
    credentials_ref: Option<String>,
}

impl PodmanBuilder {
    /// Creates a new builder
    ///
    /// # Arguments
    /// * `workspace` - Directory revisions are checked out into
    /// * `build_context` - Context directory inside the checkout (e.g., "src")
    /// * `credentials_ref` - Optional registry auth file reference
    pub fn new(
        workspace: impl Into<PathBuf>,
        build_context: impl Into<String>,
        credentials_ref: Option<String>,
    ) -> Self {
        Self {
            workspace: workspace.into(),
            build_context: build_context.into(),
            credentials_ref,
        }
    }

    fn checkout_dir(&self, revision: &Revision) -> PathBuf {
        self.workspace.join(&revision.id)
    }

    fn log_path(&self, revision: &Revision) -> PathBuf {
        self.workspace.join(format!("{}-build.log", revision.id))
    }

    async fn run_build(&self, revision: &Revision, image_uri: &str, log: &mut String) -> Result<i32> {
        let checkout = self.checkout_dir(revision);

        if checkout.exists() {
            tokio::fs::remove_dir_all(&checkout)
                .await
                .context("Failed to clean previous checkout")?;
        }
        tokio::fs::create_dir_all(&self.workspace)
            .await
            .context("Failed to create workspace directory")?;

        let mut clone = super::command("git");
        clone
            .arg("clone")
            .arg("--quiet")
            .arg("--")
            .arg(&revision.repository)
            .arg(&checkout);
        let code = run_logged(clone, "git clone", log).await?;
        if code != 0 {
            return Ok(code);
        }

        let mut checkout_cmd = super::command("git");
        checkout_cmd
            .arg("-C")
            .arg(&checkout)
            .arg("checkout")
            .arg("--quiet")
            .arg(&revision.id);
        let code = run_logged(checkout_cmd, "git checkout", log).await?;
        if code != 0 {
            return Ok(code);
        }

        let context_dir = checkout.join(&self.build_context);
        let mut build = super::command("podman");
        build.arg("build").arg("-t").arg(image_uri).arg(&context_dir);
        run_logged(build, "podman build", log).await
    }
}

#[async_trait]
impl ImageBuilder for PodmanBuilder {
    async fn build(
        &self,
        revision: &Revision,
        image_uri: &str,
    ) -> Result<BuildOutput, BuildFailure> {
        info!("Building {} as {}", revision, image_uri);

        let log_path = self.log_path(revision);
        let logs_ref = log_path.display().to_string();
        let mut log = String::new();

        let result = self.run_build(revision, image_uri, &mut log).await;
        write_log(&log_path, &log).await;

        match result {
            Ok(0) => {
                info!("Built {} (logs: {})", image_uri, logs_ref);
                Ok(BuildOutput { logs_ref })
            }
            Ok(code) => {
                error!("Build of {} exited with {}", image_uri, code);
                Err(BuildFailure {
                    exit_status: Some(code),
                    logs_ref,
                })
            }
            Err(e) => {
                error!("Build of {} could not run: {:#}", image_uri, e);
                Err(BuildFailure {
                    exit_status: None,
                    logs_ref,
                })
            }
        }
    }

    async fn push(&self, image_uri: &str) -> Result<(), PushFailure> {
        debug!("Pushing {}", image_uri);

        let mut command = super::command("podman");
        command.arg("push");
        if let Some(authfile) = &self.credentials_ref {
            command.arg("--authfile").arg(authfile);
        }
        command.arg(image_uri);

        let output = command
            .output()
            .await
            .map_err(|e| PushFailure::Network(format!("failed to execute podman push: {}", e)))?;

        if output.status.success() {
            info!("Pushed {}", image_uri);
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!("podman push {} failed: {}", image_uri, stderr.trim());
        Err(classify_push_failure(stderr.trim()))
    }
}

/// Run a command, appending its output to `log`, and return its exit code
async fn run_logged(mut command: Command, label: &str, log: &mut String) -> Result<i32> {
    let output = command
        .output()
        .await
        .with_context(|| format!("Failed to execute {}", label))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let code = output.status.code().unwrap_or(-1);

    log.push_str(&format!("$ {}\n", label));
    log.push_str(&stdout);
    log.push_str(&stderr);
    log.push_str(&format!("[exit {}]\n", code));

    debug!("{} exited with {}", label, code);
    Ok(code)
}

async fn write_log(path: &Path, log: &str) {
    if let Err(e) = tokio::fs::write(path, log).await {
        warn!("Failed to write build log {}: {}", path.display(), e);
    }
}

fn classify_push_failure(stderr: &str) -> PushFailure {
    let lowered = stderr.to_ascii_lowercase();
    let auth_markers = ["unauthorized", "authentication required", "denied", "403"];

    if auth_markers.iter().any(|marker| lowered.contains(marker)) {
        PushFailure::Auth(stderr.to_string())
    } else {
        PushFailure::Network(stderr.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_push_failure() {
        assert!(matches!(
            classify_push_failure("Error: unauthorized: authentication required"),
            PushFailure::Auth(_)
        ));
        assert!(matches!(
            classify_push_failure("requested access to the resource is DENIED"),
            PushFailure::Auth(_)
        ));
        assert!(matches!(
            classify_push_failure("dial tcp 10.0.0.1:443: i/o timeout"),
            PushFailure::Network(_)
        ));
    }

    #[test]
    fn test_paths_are_per_revision() {
        let builder = PodmanBuilder::new("/var/lib/conveyor", "src", None);
        let rev = Revision::new("abc123", "https://example.com/app.git", "main");
        assert_eq!(
            builder.checkout_dir(&rev),
            PathBuf::from("/var/lib/conveyor/abc123")
        );
        assert_eq!(
            builder.log_path(&rev),
            PathBuf::from("/var/lib/conveyor/abc123-build.log")
        );
    }
}
