//! Secret-store backends: where owner keys and rekey records live.
//!
//! Paths are `/`-separated segments such as `umbral/rekeys/<id>`. Each value
//! is a flat JSON object.

use crate::service::config::{StoreBackend, StoreConfig};

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use quick_error::quick_error;
use tokio::sync::RwLock;

pub type SecretData = serde_json::Map<String, serde_json::Value>;

quick_error! {
  #[derive(Debug)]
  pub enum StoreError {
      /// Transient failure; the call may be retried.
      Unavailable(msg: String) {
        display("store unavailable: {}", msg)
      }
      InvalidPath(path: String) {
        display("invalid store path: {:?}", path)
      }
      Io(err: std::io::Error) {
        from()
        display("store io: {}", err)
        source(err)
      }
      Serialization(err: serde_json::Error) {
        from()
        display("store serialization: {}", err)
        source(err)
      }
  }
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// Backend for persisting secrets.
///
/// Implement this for your infrastructure:
/// - InMemoryStore (testing)
/// - FileStore (development)
/// - A KV secrets engine (production)
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, path: &str) -> Result<Option<SecretData>, StoreError>;
    async fn put(&self, path: &str, data: &SecretData) -> Result<(), StoreError>;
    /// Writes only if nothing exists at `path`. Returns whether it wrote.
    async fn put_if_absent(&self, path: &str, data: &SecretData) -> Result<bool, StoreError>;
    /// Deleting a missing path is not an error.
    async fn delete(&self, path: &str) -> Result<(), StoreError>;
    /// Every path below `prefix`, in lexical order.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Splits a store path into validated segments.
pub fn path_segments(path: &str) -> Result<Vec<&str>, StoreError> {
    let segments: Vec<&str> = path.split('/').collect();
    let valid = segments.iter().all(|s| {
        !s.is_empty()
            && *s != "."
            && *s != ".."
            && s
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    });
    if valid {
        Ok(segments)
    } else {
        Err(StoreError::InvalidPath(path.to_string()))
    }
}

/// Converts a record into the flat JSON object the store keeps.
pub fn encode_record<T: serde::Serialize>(record: &T) -> Result<SecretData, StoreError> {
    Ok(serde_json::from_value(serde_json::to_value(record)?)?)
}

pub fn decode_record<T: serde::de::DeserializeOwned>(data: SecretData) -> Result<T, StoreError> {
    Ok(serde_json::from_value(serde_json::Value::Object(data))?)
}

pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn SecretStore>, StoreError> {
    match &config.backend {
        StoreBackend::Memory => Ok(Arc::new(InMemoryStore::new())),
        StoreBackend::File { path } => Ok(Arc::new(FileStore::new(path)?)),
    }
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

/// In-memory storage (for testing and ephemeral use).
pub struct InMemoryStore {
    entries: RwLock<BTreeMap<String, SecretData>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecretStore for InMemoryStore {
    async fn get(&self, path: &str) -> Result<Option<SecretData>, StoreError> {
        path_segments(path)?;
        Ok(self.entries.read().await.get(path).cloned())
    }

    async fn put(&self, path: &str, data: &SecretData) -> Result<(), StoreError> {
        path_segments(path)?;
        self.entries
            .write()
            .await
            .insert(path.to_string(), data.clone());
        Ok(())
    }

    async fn put_if_absent(&self, path: &str, data: &SecretData) -> Result<bool, StoreError> {
        path_segments(path)?;
        let mut entries = self.entries.write().await;
        if entries.contains_key(path) {
            return Ok(false);
        }
        entries.insert(path.to_string(), data.clone());
        Ok(true)
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        path_segments(path)?;
        self.entries.write().await.remove(path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        path_segments(prefix)?;
        let below = format!("{}/", prefix);
        Ok(self
            .entries
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(&below))
            .cloned()
            .collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// File backend
// ---------------------------------------------------------------------------

/// File-based storage (one JSON file per path).
///
/// Directory layout:
/// ```text
/// root/
///   umbral/owners/{owner_id}.json
///   umbral/rekeys/{rekey_id}.json
/// ```
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn file_path(&self, path: &str) -> Result<PathBuf, StoreError> {
        let segments = path_segments(path)?;
        let mut file = self.root.clone();
        for segment in &segments[..segments.len() - 1] {
            file.push(segment);
        }
        file.push(format!("{}.json", segments[segments.len() - 1]));
        Ok(file)
    }

    fn dir_path(&self, prefix: &str) -> Result<PathBuf, StoreError> {
        let mut dir = self.root.clone();
        for segment in path_segments(prefix)? {
            dir.push(segment);
        }
        Ok(dir)
    }

    /// Writes `data` next to `target` under a unique temporary name.
    async fn write_tmp(target: &Path, data: &SecretData) -> Result<PathBuf, StoreError> {
        let json = serde_json::to_vec_pretty(data)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = target.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, &json).await?;
        Ok(tmp)
    }
}

#[async_trait]
impl SecretStore for FileStore {
    async fn get(&self, path: &str) -> Result<Option<SecretData>, StoreError> {
        let file = self.file_path(path)?;
        match tokio::fs::read(&file).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, path: &str, data: &SecretData) -> Result<(), StoreError> {
        let file = self.file_path(path)?;
        // Atomic write: write to temp, then rename
        let tmp = Self::write_tmp(&file, data).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &file).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn put_if_absent(&self, path: &str, data: &SecretData) -> Result<bool, StoreError> {
        let file = self.file_path(path)?;
        // A hard link never replaces an existing file, unlike rename.
        let tmp = Self::write_tmp(&file, data).await?;
        let linked = tokio::fs::hard_link(&tmp, &file).await;
        let _ = tokio::fs::remove_file(&tmp).await;
        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        let file = self.file_path(path)?;
        match tokio::fs::remove_file(&file).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut paths = Vec::new();
        let mut pending = vec![(self.dir_path(prefix)?, prefix.to_string())];

        while let Some((dir, logical)) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                if entry.file_type().await?.is_dir() {
                    pending.push((entry.path(), format!("{}/{}", logical, name)));
                } else if let Some(stem) = name.strip_suffix(".json") {
                    if path_segments(stem).is_ok() {
                        paths.push(format!("{}/{}", logical, stem));
                    }
                }
            }
        }

        paths.sort();
        Ok(paths)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        tokio::fs::metadata(&self.root)
            .await
            .map(|_| ())
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(value: &str) -> SecretData {
        let mut map = SecretData::new();
        map.insert("value".into(), json!(value));
        map
    }

    async fn exercise(store: &dyn SecretStore) {
        assert!(store.get("umbral/owners/alice").await.unwrap().is_none());

        store.put("umbral/owners/alice", &data("one")).await.unwrap();
        assert_eq!(
            store.get("umbral/owners/alice").await.unwrap(),
            Some(data("one"))
        );

        store.put("umbral/owners/alice", &data("two")).await.unwrap();
        assert_eq!(
            store.get("umbral/owners/alice").await.unwrap(),
            Some(data("two"))
        );

        assert!(!store
            .put_if_absent("umbral/owners/alice", &data("three"))
            .await
            .unwrap());
        assert!(store
            .put_if_absent("umbral/owners/bob", &data("four"))
            .await
            .unwrap());
        assert_eq!(
            store.get("umbral/owners/alice").await.unwrap(),
            Some(data("two"))
        );

        store.put("umbral/rekeys/r1", &data("r")).await.unwrap();
        assert_eq!(
            store.list("umbral/owners").await.unwrap(),
            vec!["umbral/owners/alice".to_string(), "umbral/owners/bob".to_string()]
        );
        assert_eq!(store.list("umbral").await.unwrap().len(), 3);
        assert!(store.list("nothing/here").await.unwrap().is_empty());

        store.delete("umbral/owners/alice").await.unwrap();
        store.delete("umbral/owners/alice").await.unwrap();
        assert!(store.get("umbral/owners/alice").await.unwrap().is_none());

        store.ping().await.unwrap();
    }

    #[tokio::test]
    async fn in_memory_store_contract() {
        exercise(&InMemoryStore::new()).await;
    }

    #[tokio::test]
    async fn file_store_contract() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        exercise(&store).await;
        assert!(dir.path().join("umbral/rekeys/r1.json").exists());
    }

    #[tokio::test]
    async fn file_store_put_if_absent_single_winner() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileStore::new(dir.path()).unwrap());

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .put_if_absent("umbral/grants/g", &data(&i.to_string()))
                    .await
                    .unwrap()
            }));
        }
        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
        assert_eq!(store.list("umbral/grants").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rejects_traversal_paths() {
        let store = InMemoryStore::new();
        for bad in ["", "a//b", "../etc", "a/./b", "a/b c", "/abs"] {
            assert!(matches!(
                store.get(bad).await,
                Err(StoreError::InvalidPath(_))
            ));
        }
    }
}
