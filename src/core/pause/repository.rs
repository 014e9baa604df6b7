use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::entity::PauseEntity;
use crate::error::WorkflowError;

#[derive(Debug, thiserror::Error)]
pub enum PauseError {
    #[error("Pause not found: {0}")]
    NotFound(String),
    #[error("Pause {0} has already been resumed")]
    AlreadyResumed(String),
    #[error("Pause {0} already exists")]
    Duplicate(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("Invalid pause id: {0:?}")]
    InvalidId(String),
}

impl From<PauseError> for WorkflowError {
    fn from(e: PauseError) -> Self {
        match e {
            PauseError::NotFound(id) => WorkflowError::PauseNotFound(id),
            PauseError::AlreadyResumed(id) => WorkflowError::AlreadyResumed(id),
            PauseError::SerializationError(m) => WorkflowError::SerializationError(m),
            other => WorkflowError::PauseRepositoryError(other.to_string()),
        }
    }
}

/// Durable storage of pause entities.
#[async_trait]
pub trait PauseRepository: Send + Sync {
    /// Persist a new pause and return its id.
    async fn create(&self, entity: PauseEntity) -> Result<String, PauseError>;
    async fn get(&self, id: &str) -> Result<Option<PauseEntity>, PauseError>;
    /// Atomically stamp `resumed_at`; fails with `AlreadyResumed` if set.
    async fn mark_resumed(&self, id: &str, at: DateTime<Utc>) -> Result<(), PauseError>;
    async fn delete(&self, id: &str) -> Result<(), PauseError>;
    /// Remove up to `limit` pauses created before `expiration` or already
    /// resumed; returns the removed ids.
    async fn prune(&self, expiration: DateTime<Utc>, limit: usize) -> Result<Vec<String>, PauseError>;
}

fn is_prunable(entity: &PauseEntity, expiration: DateTime<Utc>) -> bool {
    entity.created_at < expiration || entity.resumed_at.is_some()
}

#[derive(Default)]
pub struct MemoryPauseRepository {
    data: tokio::sync::RwLock<HashMap<String, PauseEntity>>,
}

impl MemoryPauseRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }
}

#[async_trait]
impl PauseRepository for MemoryPauseRepository {
    async fn create(&self, entity: PauseEntity) -> Result<String, PauseError> {
        let mut data = self.data.write().await;
        if data.contains_key(&entity.id) {
            return Err(PauseError::Duplicate(entity.id));
        }
        let id = entity.id.clone();
        data.insert(id.clone(), entity);
        Ok(id)
    }

    async fn get(&self, id: &str) -> Result<Option<PauseEntity>, PauseError> {
        Ok(self.data.read().await.get(id).cloned())
    }

    async fn mark_resumed(&self, id: &str, at: DateTime<Utc>) -> Result<(), PauseError> {
        let mut data = self.data.write().await;
        let entity = data
            .get_mut(id)
            .ok_or_else(|| PauseError::NotFound(id.to_string()))?;
        if entity.resumed_at.is_some() {
            return Err(PauseError::AlreadyResumed(id.to_string()));
        }
        entity.resumed_at = Some(at);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), PauseError> {
        self.data.write().await.remove(id);
        Ok(())
    }

    async fn prune(&self, expiration: DateTime<Utc>, limit: usize) -> Result<Vec<String>, PauseError> {
        let mut data = self.data.write().await;
        let mut victims: Vec<(DateTime<Utc>, String)> = data
            .values()
            .filter(|e| is_prunable(e, expiration))
            .map(|e| (e.created_at, e.id.clone()))
            .collect();
        victims.sort();
        victims.truncate(limit);
        let ids: Vec<String> = victims.into_iter().map(|(_, id)| id).collect();
        for id in &ids {
            data.remove(id);
        }
        Ok(ids)
    }
}

/// One JSON file per pause under `dir`.
pub struct FilePauseRepository {
    dir: PathBuf,
    // Serializes read-modify-write cycles within this process.
    write_lock: tokio::sync::Mutex<()>,
}

impl FilePauseRepository {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, PauseError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| PauseError::StorageError(e.to_string()))?;
        Ok(Self {
            dir,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Ids name files directly inside `dir`, so they may not contain path
    /// separators or be a relative component.
    fn path_for(&self, id: &str) -> Result<PathBuf, PauseError> {
        if id.is_empty() || id == "." || id == ".." || id.contains(['/', '\\', '\0']) {
            return Err(PauseError::InvalidId(id.to_string()));
        }
        Ok(self.dir.join(format!("{}.pause.json", id)))
    }

    async fn read(&self, id: &str) -> Result<Option<PauseEntity>, PauseError> {
        let bytes = match tokio::fs::read(self.path_for(id)?).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PauseError::StorageError(e.to_string())),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| PauseError::SerializationError(e.to_string()))
    }

    async fn write(&self, entity: &PauseEntity) -> Result<(), PauseError> {
        let path = self.path_for(&entity.id)?;
        let bytes = serde_json::to_vec_pretty(entity)
            .map_err(|e| PauseError::SerializationError(e.to_string()))?;
        // Write-then-rename so readers never see a torn file.
        let tmp = self.dir.join(format!("{}.pause.json.tmp", entity.id));
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| PauseError::StorageError(e.to_string()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| PauseError::StorageError(e.to_string()))
    }
}

#[async_trait]
impl PauseRepository for FilePauseRepository {
    async fn create(&self, entity: PauseEntity) -> Result<String, PauseError> {
        let _guard = self.write_lock.lock().await;
        if self.read(&entity.id).await?.is_some() {
            return Err(PauseError::Duplicate(entity.id));
        }
        self.write(&entity).await?;
        Ok(entity.id)
    }

    async fn get(&self, id: &str) -> Result<Option<PauseEntity>, PauseError> {
        self.read(id).await
    }

    async fn mark_resumed(&self, id: &str, at: DateTime<Utc>) -> Result<(), PauseError> {
        let _guard = self.write_lock.lock().await;
        let mut entity = self
            .read(id)
            .await?
            .ok_or_else(|| PauseError::NotFound(id.to_string()))?;
        if entity.resumed_at.is_some() {
            return Err(PauseError::AlreadyResumed(id.to_string()));
        }
        entity.resumed_at = Some(at);
        self.write(&entity).await
    }

    async fn delete(&self, id: &str) -> Result<(), PauseError> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(self.path_for(id)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PauseError::StorageError(e.to_string())),
        }
    }

    async fn prune(&self, expiration: DateTime<Utc>, limit: usize) -> Result<Vec<String>, PauseError> {
        let _guard = self.write_lock.lock().await;
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| PauseError::StorageError(e.to_string()))?;
        let mut victims = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PauseError::StorageError(e.to_string()))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(id) = name.strip_suffix(".pause.json") else {
                continue;
            };
            if let Some(entity) = self.read(id).await? {
                if is_prunable(&entity, expiration) {
                    victims.push((entity.created_at, entity.id));
                }
            }
        }
        victims.sort();
        victims.truncate(limit);

        let mut removed = Vec::with_capacity(victims.len());
        for (_, id) in victims {
            tokio::fs::remove_file(self.path_for(&id)?)
                .await
                .map_err(|e| PauseError::StorageError(e.to_string()))?;
            removed.push(id);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entity(id: &str, created_at: DateTime<Utc>) -> PauseEntity {
        PauseEntity::new(id, "exec-1", b"state".to_vec(), Vec::new(), created_at)
    }

    #[tokio::test]
    async fn test_memory_mark_resumed_only_once() {
        let repo = MemoryPauseRepository::new();
        let id = repo.create(entity("p1", Utc::now())).await.unwrap();
        repo.mark_resumed(&id, Utc::now()).await.unwrap();
        let err = repo.mark_resumed(&id, Utc::now()).await.unwrap_err();
        assert!(matches!(err, PauseError::AlreadyResumed(_)));
        assert!(matches!(
            repo.mark_resumed("ghost", Utc::now()).await,
            Err(PauseError::NotFound(_))
        ));
        assert!(matches!(
            repo.create(entity("p1", Utc::now())).await,
            Err(PauseError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_prune_is_bounded() {
        let repo = MemoryPauseRepository::new();
        let now = Utc::now();
        repo.create(entity("old1", now - Duration::hours(3))).await.unwrap();
        repo.create(entity("old2", now - Duration::hours(2))).await.unwrap();
        repo.create(entity("fresh", now)).await.unwrap();

        let removed = repo.prune(now - Duration::hours(1), 1).await.unwrap();
        assert_eq!(removed, vec!["old1".to_string()]);
        let removed = repo.prune(now - Duration::hours(1), 10).await.unwrap();
        assert_eq!(removed, vec!["old2".to_string()]);

        repo.mark_resumed("fresh", now).await.unwrap();
        let removed = repo.prune(now - Duration::hours(1), 10).await.unwrap();
        assert_eq!(removed, vec!["fresh".to_string()]);
        assert_eq!(repo.len().await, 0);
    }

    #[tokio::test]
    async fn test_file_repository_persists_and_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FilePauseRepository::new(dir.path()).unwrap();
        let id = repo.create(entity("p1", Utc::now())).await.unwrap();

        // A second repository over the same directory sees the pause.
        let other = FilePauseRepository::new(dir.path()).unwrap();
        let loaded = other.get(&id).await.unwrap().unwrap();
        assert_eq!(loaded.state, b"state".to_vec());

        other.mark_resumed(&id, Utc::now()).await.unwrap();
        assert!(matches!(
            repo.mark_resumed(&id, Utc::now()).await,
            Err(PauseError::AlreadyResumed(_))
        ));

        repo.delete(&id).await.unwrap();
        assert!(repo.get(&id).await.unwrap().is_none());
        repo.delete(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_file_repository_stays_inside_its_directory() {
        let root = tempfile::tempdir().unwrap();
        let outside = FilePauseRepository::new(root.path()).unwrap();
        outside.create(entity("secret", Utc::now())).await.unwrap();
        let repo = FilePauseRepository::new(root.path().join("pauses")).unwrap();

        for id in ["../secret", "..", "a/b", "a\\b", ""] {
            assert!(matches!(repo.get(id).await, Err(PauseError::InvalidId(_))), "{}", id);
            assert!(matches!(repo.delete(id).await, Err(PauseError::InvalidId(_))));
            assert!(matches!(
                repo.mark_resumed(id, Utc::now()).await,
                Err(PauseError::InvalidId(_))
            ));
        }
        assert!(matches!(
            repo.create(entity("../escape", Utc::now())).await,
            Err(PauseError::InvalidId(_))
        ));
        assert!(outside.get("secret").await.unwrap().is_some());
        assert!(!root.path().join("escape.pause.json").exists());
    }

    #[tokio::test]
    async fn test_file_repository_prune() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FilePauseRepository::new(dir.path()).unwrap();
        let now = Utc::now();
        repo.create(entity("old", now - Duration::days(2))).await.unwrap();
        repo.create(entity("new", now)).await.unwrap();

        let removed = repo.prune(now - Duration::days(1), 10).await.unwrap();
        assert_eq!(removed, vec!["old".to_string()]);
        assert!(repo.get("new").await.unwrap().is_some());
    }

    #[test]
    fn test_pause_error_maps_to_workflow_error() {
        let err: WorkflowError = PauseError::AlreadyResumed("p".into()).into();
        assert!(matches!(err, WorkflowError::AlreadyResumed(_)));
        let err: WorkflowError = PauseError::StorageError("disk".into()).into();
        assert!(matches!(err, WorkflowError::PauseRepositoryError(_)));
    }
}
