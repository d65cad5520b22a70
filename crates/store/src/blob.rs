//! Filesystem blob store.
//!
//! Keys are bucket-qualified relative paths (`<bucket>/<name>`); the
//! returned reference is the key itself, so references stay portable
//! across backends that address blobs by name.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use webharvest_shared::{HarvestError, Result};

use crate::BlobStore;

/// Blob storage rooted at a local directory, one subdirectory per bucket.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Create a blob store rooted at `root`. Directories are created
    /// lazily on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        // Keep keys inside the root; blob names never contain separators
        // beyond the bucket prefix.
        if key.contains("..") || Path::new(key).is_absolute() {
            return Err(HarvestError::validation(format!("invalid blob key: {key:?}")));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<String> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| HarvestError::io(parent, e))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| HarvestError::io(&path, e))?;
        Ok(key.to_string())
    }

    async fn get(&self, blob_ref: &str) -> Result<Vec<u8>> {
        let path = self.path_for(blob_ref)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| HarvestError::io(&path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn test_root() -> PathBuf {
        std::env::temp_dir().join(format!("wh_blobs_{}", Uuid::now_v7()))
    }

    #[tokio::test]
    async fn put_then_get_roundtrip() {
        let store = FsBlobStore::new(test_root());

        let blob_ref = store
            .put("text/example.org__a.txt", b"Hello\nWorld\n")
            .await
            .expect("put");
        assert_eq!(blob_ref, "text/example.org__a.txt");

        let bytes = store.get(&blob_ref).await.expect("get");
        assert_eq!(bytes, b"Hello\nWorld\n");
    }

    #[tokio::test]
    async fn buckets_are_directories() {
        let root = test_root();
        let store = FsBlobStore::new(&root);

        store.put("pdf/example.org__f.pdf", b"%PDF-").await.unwrap();
        assert!(root.join("pdf").join("example.org__f.pdf").exists());
    }

    #[tokio::test]
    async fn missing_blob_errors() {
        let store = FsBlobStore::new(test_root());
        assert!(store.get("text/absent.txt").await.is_err());
    }

    #[tokio::test]
    async fn traversal_keys_rejected() {
        let store = FsBlobStore::new(test_root());
        assert!(store.put("../escape.txt", b"x").await.is_err());
        assert!(store.get("/etc/passwd").await.is_err());
    }
}
