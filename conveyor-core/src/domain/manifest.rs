//! Image manifest domain types
//!
//! The manifest is the one artifact whose shape must round-trip exactly between
//! the build stage and the deploy stage. It serializes as
//! `[{"name":"<component>","imageUri":"<registry reference>"}]`.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::domain::revision::Revision;

/// Artifact name under which the manifest is sealed
pub const MANIFEST_ARTIFACT: &str = "imagedefinitions.json";

/// Maps one deployable component to a fully qualified image reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReference {
    /// Service component name
    pub name: String,
    /// Registry reference including tag or digest
    #[serde(rename = "imageUri")]
    pub image_uri: String,
}

impl ImageReference {
    pub fn new(name: impl Into<String>, image_uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image_uri: image_uri.into(),
        }
    }

    /// Check that the reference names a component and pins a tag or digest
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("component name cannot be empty".to_string());
        }
        validate_image_uri(&self.image_uri)
    }
}

/// Check that an image URI is a registry reference with a tag or digest
pub fn validate_image_uri(uri: &str) -> Result<(), String> {
    if uri.is_empty() {
        return Err("image URI cannot be empty".to_string());
    }
    if uri.chars().any(char::is_whitespace) {
        return Err(format!("image URI '{}' contains whitespace", uri));
    }

    if let Some((repo, digest)) = uri.split_once('@') {
        if repo.is_empty() || !digest.contains(':') || digest.ends_with(':') {
            return Err(format!("image URI '{}' has a malformed digest", uri));
        }
        return Ok(());
    }

    // The tag separator is the last ':' after the final path segment; a ':' before
    // it belongs to a registry port.
    let last_segment = uri.rsplit('/').next().unwrap_or(uri);
    match last_segment.rsplit_once(':') {
        Some((name, tag)) if !name.is_empty() && !tag.is_empty() => Ok(()),
        _ => Err(format!("image URI '{}' has no tag or digest", uri)),
    }
}

/// Ordered sequence of image references produced by one build
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest(pub Vec<ImageReference>);

impl Manifest {
    pub fn new(references: Vec<ImageReference>) -> Self {
        Self(references)
    }

    /// Manifest with one entry per component, all pointing at the same image
    pub fn for_components<S: AsRef<str>>(components: &[S], image_uri: &str) -> Self {
        Self(
            components
                .iter()
                .map(|name| ImageReference::new(name.as_ref(), image_uri))
                .collect(),
        )
    }

    pub fn references(&self) -> &[ImageReference] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ImageReference> {
        self.0.iter()
    }

    /// Encode in the `imagedefinitions.json` wire format
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode from the `imagedefinitions.json` wire format
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

impl<'a> IntoIterator for &'a Manifest {
    type Item = &'a ImageReference;
    type IntoIter = std::slice::Iter<'a, ImageReference>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// How the build stage tags the images it pushes
///
/// Has no default; every pipeline configures one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagPolicy {
    /// Tag with the resolved revision identifier
    Revision,
    /// Tag with a fixed rolling tag such as `latest`
    Fixed(String),
}

impl TagPolicy {
    /// The literal tag for a build of `revision`
    pub fn tag_for(&self, revision: &Revision) -> String {
        match self {
            TagPolicy::Revision => revision.id.clone(),
            TagPolicy::Fixed(tag) => tag.clone(),
        }
    }

    /// Full image URI for a build of `revision` in `repository`
    pub fn image_uri(&self, repository: &str, revision: &Revision) -> String {
        format!("{}:{}", repository, self.tag_for(revision))
    }
}

impl FromStr for TagPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "revision" {
            return Ok(TagPolicy::Revision);
        }
        match s.strip_prefix("fixed:") {
            Some(tag) => {
                validate_tag(tag)?;
                Ok(TagPolicy::Fixed(tag.to_string()))
            }
            None => Err(format!(
                "invalid tag policy '{}' (expected 'revision' or 'fixed:<tag>')",
                s
            )),
        }
    }
}

impl std::fmt::Display for TagPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TagPolicy::Revision => write!(f, "revision"),
            TagPolicy::Fixed(tag) => write!(f, "fixed:{}", tag),
        }
    }
}

fn validate_tag(tag: &str) -> Result<(), String> {
    const MAX_TAG_LENGTH: usize = 128;

    if tag.is_empty() {
        return Err("fixed tag cannot be empty".to_string());
    }
    if tag.len() > MAX_TAG_LENGTH {
        return Err(format!("tag is too long (max {} characters)", MAX_TAG_LENGTH));
    }
    if tag.starts_with('.') || tag.starts_with('-') {
        return Err(format!("tag '{}' cannot start with '.' or '-'", tag));
    }
    if !tag
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err(format!("tag '{}' contains invalid characters", tag));
    }
    Ok(())
}
