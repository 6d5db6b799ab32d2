//! Source-control resolvers

use anyhow::{Context, Result};
use async_trait::async_trait;
use conveyor_core::domain::revision::{Revision, normalize_revision_id};
use tracing::{debug, info};

use super::{ResolveFailure, SourceControl};

/// Trusts the pushed revision id once it looks like one
#[derive(Debug, Clone, Default)]
pub struct PassthroughSource;

impl PassthroughSource {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SourceControl for PassthroughSource {
    async fn resolve(&self, revision: &Revision) -> Result<Revision, ResolveFailure> {
        let id = normalize_revision_id(&revision.id).map_err(ResolveFailure::new)?;
        Ok(revision.resolved(id))
    }
}

/// Asks the remote for the head of the pushed branch with `git ls-remote`
///
/// The pushed id must be the head itself or a prefix of it; anything else is
/// either stale or unknown to the remote.
#[derive(Debug, Clone, Default)]
pub struct GitRemoteSource;

impl GitRemoteSource {
    pub fn new() -> Self {
        Self
    }

    async fn branch_head(&self, repository: &str, branch: &str) -> Result<Option<String>> {
        let reference = format!("refs/heads/{}", branch);
        debug!("Running git ls-remote {} {}", repository, reference);

        let output = super::command("git")
            .arg("ls-remote")
            .arg("--")
            .arg(repository)
            .arg(&reference)
            .output()
            .await
            .context("Failed to execute 'git ls-remote'. Is git installed?")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "git ls-remote exited with {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_ls_remote(&stdout, &reference))
    }
}

#[async_trait]
impl SourceControl for GitRemoteSource {
    async fn resolve(&self, revision: &Revision) -> Result<Revision, ResolveFailure> {
        let pushed = normalize_revision_id(&revision.id).map_err(ResolveFailure::new)?;

        let head = self
            .branch_head(&revision.repository, &revision.branch)
            .await
            .map_err(|e| ResolveFailure::new(format!("{:#}", e)))?
            .ok_or_else(|| {
                ResolveFailure::new(format!(
                    "branch '{}' does not exist on {}",
                    revision.branch, revision.repository
                ))
            })?;

        if !head.starts_with(&pushed) {
            return Err(ResolveFailure::new(format!(
                "revision {} is not the head of '{}' (head is {})",
                pushed, revision.branch, head
            )));
        }

        info!("Resolved {} to {}", revision, head);
        Ok(revision.resolved(head))
    }
}

/// Find the object id for `reference` in `git ls-remote` output
fn parse_ls_remote(output: &str, reference: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let (object_id, name) = line.split_once('\t')?;
        (name.trim() == reference).then(|| object_id.trim().to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_passthrough_normalizes() {
        let source = PassthroughSource::new();
        let rev = Revision::new(" ABC123 ", "repo", "main");
        let resolved = source.resolve(&rev).await.unwrap();
        assert_eq!(resolved.id, "abc123");
        assert_eq!(resolved.branch, "main");
    }

    #[tokio::test]
    async fn test_passthrough_rejects_garbage() {
        let source = PassthroughSource::new();
        assert!(source.resolve(&Revision::new("", "repo", "main")).await.is_err());
        assert!(
            source
                .resolve(&Revision::new("abc 123", "repo", "main"))
                .await
                .is_err()
        );
        assert!(
            source
                .resolve(&Revision::new("../etc", "repo", "main"))
                .await
                .is_err()
        );
    }

    #[test]
    fn test_parse_ls_remote() {
        let output = "\
1111111111111111111111111111111111111111\trefs/heads/main-old
2222222222222222222222222222222222222222\trefs/heads/main
";
        assert_eq!(
            parse_ls_remote(output, "refs/heads/main").as_deref(),
            Some("2222222222222222222222222222222222222222")
        );
        assert_eq!(parse_ls_remote(output, "refs/heads/dev"), None);
        assert_eq!(parse_ls_remote("", "refs/heads/main"), None);
    }
}
