use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use conveyor_core::domain::artifact::{Artifact, ArtifactKey, NewArtifact};
use conveyor_core::domain::run::StageName;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ArtifactError, ArtifactStore};

/// In-memory artifact store, keyed by run
#[derive(Debug, Clone, Default)]
pub struct MemoryArtifactStore {
    runs: Arc<RwLock<HashMap<Uuid, Vec<Artifact>>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn seal(
        &self,
        run_id: Uuid,
        stage: StageName,
        artifact: NewArtifact,
    ) -> Result<Artifact, ArtifactError> {
        let key = ArtifactKey::new(run_id, stage, artifact.name);

        let mut runs = self.runs.write().await;
        let bag = runs.entry(run_id).or_default();
        if bag.iter().any(|existing| existing.key == key) {
            return Err(ArtifactError::AlreadySealed(key));
        }

        let sealed = Artifact {
            key,
            content_type: artifact.content_type,
            sequence: bag.len() as u32 + 1,
            sealed_at: Utc::now(),
            content: artifact.content,
        };
        bag.push(sealed.clone());

        tracing::debug!(key = %sealed.key, sequence = sealed.sequence, "Sealed artifact");
        Ok(sealed)
    }

    async fn get(&self, key: &ArtifactKey) -> Result<Artifact, ArtifactError> {
        let runs = self.runs.read().await;
        runs.get(&key.run_id)
            .and_then(|bag| bag.iter().find(|artifact| &artifact.key == key))
            .cloned()
            .ok_or_else(|| ArtifactError::NotFound(key.clone()))
    }

    async fn list(&self, run_id: Uuid) -> Result<Vec<Artifact>, ArtifactError> {
        let runs = self.runs.read().await;
        Ok(runs.get(&run_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_seal_and_get() {
        let store = MemoryArtifactStore::new();
        let run_id = Uuid::new_v4();

        let sealed = store
            .seal(
                run_id,
                StageName::Source,
                NewArtifact::json("source.json", b"{}".to_vec()),
            )
            .await
            .unwrap();
        assert_eq!(sealed.sequence, 1);
        assert_eq!(sealed.content_type, "application/json");

        let fetched = store.get(&sealed.key).await.unwrap();
        assert_eq!(fetched, sealed);
    }

    #[tokio::test]
    async fn test_seal_is_write_once() {
        let store = MemoryArtifactStore::new();
        let run_id = Uuid::new_v4();

        store
            .seal(run_id, StageName::Build, NewArtifact::json("m.json", b"[1]".to_vec()))
            .await
            .unwrap();
        let err = store
            .seal(run_id, StageName::Build, NewArtifact::json("m.json", b"[2]".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, ArtifactError::AlreadySealed(_)));

        let key = ArtifactKey::new(run_id, StageName::Build, "m.json");
        assert_eq!(store.get(&key).await.unwrap().content, b"[1]".to_vec());
    }

    #[tokio::test]
    async fn test_same_name_in_different_stages() {
        let store = MemoryArtifactStore::new();
        let run_id = Uuid::new_v4();

        store
            .seal(run_id, StageName::Build, NewArtifact::json("m.json", b"[]".to_vec()))
            .await
            .unwrap();
        let second = store
            .seal(run_id, StageName::Approve, NewArtifact::json("m.json", b"[]".to_vec()))
            .await
            .unwrap();
        assert_eq!(second.sequence, 2);

        let listed = store.list(run_id).await.unwrap();
        let stages: Vec<_> = listed.iter().map(|a| a.key.stage).collect();
        assert_eq!(stages, vec![StageName::Build, StageName::Approve]);
    }

    #[tokio::test]
    async fn test_missing_artifact() {
        let store = MemoryArtifactStore::new();
        let key = ArtifactKey::new(Uuid::new_v4(), StageName::Source, "source.json");
        assert!(matches!(
            store.get(&key).await,
            Err(ArtifactError::NotFound(_))
        ));
        assert!(store.list(key.run_id).await.unwrap().is_empty());
    }
}
