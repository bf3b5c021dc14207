//! Blob storage for raw uploads and OCR sidecar text.

use crate::error::StorageError;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use walkdir::WalkDir;

pub type BlobMetadata = BTreeMap<String, String>;

const CONTENT_TYPE_KEY: &str = "content_type";
const METADATA_DIR: &str = ".metadata";

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores `content` under `key` and returns the key it was stored under.
    async fn save(
        &self,
        content: &[u8],
        key: &str,
        content_type: Option<&str>,
    ) -> Result<String, StorageError>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    async fn list(&self) -> Result<Vec<String>, StorageError>;

    async fn get_metadata(&self, key: &str) -> Result<BlobMetadata, StorageError>;

    /// Merges `metadata` into the key's existing metadata.
    async fn update_metadata(&self, key: &str, metadata: BlobMetadata) -> Result<(), StorageError>;
}

#[async_trait]
impl<T: BlobStore + ?Sized> BlobStore for Arc<T> {
    async fn save(
        &self,
        content: &[u8],
        key: &str,
        content_type: Option<&str>,
    ) -> Result<String, StorageError> {
        (**self).save(content, key, content_type).await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        (**self).get(key).await
    }

    async fn list(&self) -> Result<Vec<String>, StorageError> {
        (**self).list().await
    }

    async fn get_metadata(&self, key: &str) -> Result<BlobMetadata, StorageError> {
        (**self).get_metadata(key).await
    }

    async fn update_metadata(&self, key: &str, metadata: BlobMetadata) -> Result<(), StorageError> {
        (**self).update_metadata(key, metadata).await
    }
}

/// Files under a root directory; metadata lives in JSON files under
/// `<root>/.metadata/<key>.json`.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        Ok(self.root.join(validate_key(key)?))
    }

    fn metadata_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        Ok(self
            .root
            .join(METADATA_DIR)
            .join(format!("{}.json", validate_key(key)?.display())))
    }

    async fn read_metadata(&self, path: &Path) -> Result<BlobMetadata, StorageError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(BlobMetadata::new()),
            Err(error) => Err(error.into()),
        }
    }

    async fn write_metadata(&self, path: &Path, metadata: &BlobMetadata) -> Result<(), StorageError> {
        ensure_parent(path).await?;
        tokio::fs::write(path, serde_json::to_vec_pretty(metadata)?).await?;
        Ok(())
    }
}

/// Rejects absolute keys and keys that would leave the root.
fn validate_key(key: &str) -> Result<PathBuf, StorageError> {
    let path = Path::new(key);
    let is_plain = !key.trim().is_empty()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
    let hits_metadata = path
        .components()
        .next()
        .is_some_and(|component| component.as_os_str() == METADATA_DIR);

    if !is_plain || hits_metadata {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(path.to_path_buf())
}

async fn ensure_parent(path: &Path) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(())
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn save(
        &self,
        content: &[u8],
        key: &str,
        content_type: Option<&str>,
    ) -> Result<String, StorageError> {
        let path = self.blob_path(key)?;
        ensure_parent(&path).await?;
        tokio::fs::write(&path, content).await?;

        if let Some(content_type) = content_type {
            let mut metadata = BlobMetadata::new();
            metadata.insert(CONTENT_TYPE_KEY.to_string(), content_type.to_string());
            self.update_metadata(key, metadata).await?;
        }
        Ok(key.to_string())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match tokio::fs::read(self.blob_path(key)?).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    async fn list(&self) -> Result<Vec<String>, StorageError> {
        let root = self.root.clone();
        let keys = tokio::task::spawn_blocking(move || {
            let mut keys = Vec::new();
            for entry in WalkDir::new(&root)
                .into_iter()
                .filter_entry(|entry| entry.file_name() != METADATA_DIR)
                .filter_map(|item| item.ok())
            {
                if !entry.file_type().is_file() {
                    continue;
                }
                if let Ok(relative) = entry.path().strip_prefix(&root) {
                    keys.push(relative.to_string_lossy().replace('\\', "/"));
                }
            }
            keys.sort_unstable();
            keys
        })
        .await
        .map_err(|error| StorageError::Backend(error.to_string()))?;
        Ok(keys)
    }

    async fn get_metadata(&self, key: &str) -> Result<BlobMetadata, StorageError> {
        self.read_metadata(&self.metadata_path(key)?).await
    }

    async fn update_metadata(&self, key: &str, metadata: BlobMetadata) -> Result<(), StorageError> {
        let path = self.metadata_path(key)?;
        let mut merged = self.read_metadata(&path).await?;
        merged.extend(metadata);
        self.write_metadata(&path, &merged).await
    }
}

#[derive(Debug, Default)]
struct MemoryBlob {
    content: Vec<u8>,
    metadata: BlobMetadata,
}

/// Process-local blob store; contents are lost on exit.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, MemoryBlob>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn save(
        &self,
        content: &[u8],
        key: &str,
        content_type: Option<&str>,
    ) -> Result<String, StorageError> {
        validate_key(key)?;
        let mut blobs = self.blobs.write().await;
        let blob = blobs.entry(key.to_string()).or_default();
        blob.content = content.to_vec();
        if let Some(content_type) = content_type {
            blob.metadata
                .insert(CONTENT_TYPE_KEY.to_string(), content_type.to_string());
        }
        Ok(key.to_string())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self
            .blobs
            .read()
            .await
            .get(key)
            .map(|blob| blob.content.clone()))
    }

    async fn list(&self) -> Result<Vec<String>, StorageError> {
        let mut keys: Vec<String> = self.blobs.read().await.keys().cloned().collect();
        keys.sort_unstable();
        Ok(keys)
    }

    async fn get_metadata(&self, key: &str) -> Result<BlobMetadata, StorageError> {
        Ok(self
            .blobs
            .read()
            .await
            .get(key)
            .map(|blob| blob.metadata.clone())
            .unwrap_or_default())
    }

    async fn update_metadata(&self, key: &str, metadata: BlobMetadata) -> Result<(), StorageError> {
        let mut blobs = self.blobs.write().await;
        let blob = blobs
            .get_mut(key)
            .ok_or_else(|| StorageError::Backend(format!("no blob stored under {key}")))?;
        blob.metadata.extend(metadata);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn local_store_round_trips_content_and_metadata() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = LocalBlobStore::open(dir.path()).await?;

        let key = store.save(b"%PDF-1.4", "a.pdf", Some("application/pdf")).await?;
        assert_eq!(key, "a.pdf");
        assert_eq!(store.get("a.pdf").await?, Some(b"%PDF-1.4".to_vec()));
        assert_eq!(store.get("missing.pdf").await?, None);

        let mut flag = BlobMetadata::new();
        flag.insert("ocr".to_string(), "true".to_string());
        store.update_metadata("a.pdf", flag).await?;

        let metadata = store.get_metadata("a.pdf").await?;
        assert_eq!(metadata.get("ocr").map(String::as_str), Some("true"));
        assert_eq!(
            metadata.get(CONTENT_TYPE_KEY).map(String::as_str),
            Some("application/pdf")
        );
        Ok(())
    }

    #[tokio::test]
    async fn local_store_lists_blobs_without_metadata_files() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = LocalBlobStore::open(dir.path()).await?;
        store.save(b"x", "b.pdf", Some("application/pdf")).await?;
        store.save(b"y", "b.pdf.txt", None).await?;

        assert_eq!(store.list().await?, vec!["b.pdf", "b.pdf.txt"]);
        Ok(())
    }

    #[tokio::test]
    async fn local_store_rejects_escaping_keys() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = LocalBlobStore::open(dir.path()).await?;

        for key in ["../evil.pdf", "/etc/passwd", "", ".metadata/x.json"] {
            let result = store.save(b"x", key, None).await;
            assert!(matches!(result, Err(StorageError::InvalidKey(_))), "{key}");
        }
        Ok(())
    }

    #[tokio::test]
    async fn memory_store_requires_existing_blob_for_metadata() {
        let store = MemoryBlobStore::new();
        let result = store.update_metadata("nope", BlobMetadata::new()).await;
        assert!(result.is_err());
    }
}
