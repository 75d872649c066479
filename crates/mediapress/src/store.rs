use std::path::{Path, PathBuf};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;
use crate::error::StoreError;

/// File-backed key-value store for persisted objects.
///
/// Each key is one pretty-printed JSON document under the root directory.
/// Writes go to a temp file first and are renamed into place, so readers never
/// see a half-written object. Callers serialize their own read-modify-write.
#[derive(Debug, Clone)]
pub struct JsonStore {
    root: PathBuf,
}

impl JsonStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", key))
    }

    /// Load an object, falling back to `T::default()` when it was never written
    pub async fn load<T>(&self, key: &str) -> Result<T, StoreError>
    where
        T: DeserializeOwned + Default,
    {
        let path = self.path_for(key);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        if content.trim().is_empty() {
            return Ok(T::default());
        }

        serde_json::from_str(&content).map_err(|source| StoreError::Serde {
            key: key.to_string(),
            source,
        })
    }

    /// Atomically replace the object stored under `key`
    pub async fn save<T>(&self, key: &str, value: &T) -> Result<(), StoreError>
    where
        T: Serialize,
    {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| StoreError::Io { path: self.root.clone(), source })?;

        let json = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Serde {
            key: key.to_string(),
            source,
        })?;

        let path = self.path_for(key);
        let tmp = self.root.join(format!(".{}.{}.tmp", key, Uuid::new_v4().simple()));

        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|source| StoreError::Io { path: tmp.clone(), source })?;

        if let Err(source) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StoreError::Io { path, source });
        }

        Ok(())
    }
}
