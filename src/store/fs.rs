//! Filesystem object store
//!
//! Objects live under a root directory at their key path. The ETag is the
//! SHA256 of the file content, recomputed on read. Writes go to a temporary
//! file that is renamed into place, and a process-wide lock serialises
//! precondition checks with the write.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::objects::{compute_etag, ObjectStore, PutCondition, StoredObject};
use super::{StoreError, StoreResult};

pub struct FsObjectStore {
    root_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FsObjectStore {
    /// Create a store at the given directory
    pub async fn new<P: AsRef<Path>>(root_dir: P) -> StoreResult<Self> {
        let root_dir = root_dir.as_ref().to_path_buf();
        fs::create_dir_all(&root_dir).await?;

        info!(path = %root_dir.display(), "Initialized object store");

        Ok(Self {
            root_dir,
            write_lock: Mutex::new(()),
        })
    }

    /// Map a key to a path below the root; keys may not escape it.
    fn object_path(&self, key: &str) -> StoreResult<PathBuf> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && !key.contains('\\')
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root_dir.join(relative))
    }

    async fn current_etag(path: &Path) -> StoreResult<Option<String>> {
        match fs::read(path).await {
            Ok(data) => Ok(Some(compute_etag(&data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn get_object(&self, key: &str) -> StoreResult<StoredObject> {
        let path = self.object_path(key)?;
        match fs::read(&path).await {
            Ok(data) => Ok(StoredObject {
                etag: compute_etag(&data),
                bytes: Bytes::from(data),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn put_object(
        &self,
        key: &str,
        bytes: Bytes,
        condition: PutCondition,
    ) -> StoreResult<String> {
        let path = self.object_path(key)?;
        let _guard = self.write_lock.lock().await;

        let current = Self::current_etag(&path).await?;
        if !condition.holds(current.as_deref()) {
            debug!(key = %key, "Object precondition failed");
            return Err(StoreError::ConditionFailed);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
        fs::write(&tmp, &bytes).await?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        let etag = compute_etag(&bytes);
        debug!(key = %key, etag = %etag, size = bytes.len(), "Stored object");
        Ok(etag)
    }

    async fn delete_object(&self, key: &str) -> StoreResult<()> {
        let path = self.object_path(key)?;
        let _guard = self.write_lock.lock().await;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_get_delete() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path()).await.unwrap();

        let etag = store
            .put_object("titles/c1/firefox", Bytes::from_static(b"{}"), PutCondition::IfNoneMatch)
            .await
            .unwrap();
        let obj = store.get_object("titles/c1/firefox").await.unwrap();
        assert_eq!(obj.etag, etag);
        assert_eq!(obj.bytes, Bytes::from_static(b"{}"));

        store.delete_object("titles/c1/firefox").await.unwrap();
        assert!(matches!(
            store.get_object("titles/c1/firefox").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_if_match_rejects_stale_etag() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path()).await.unwrap();

        let first = store
            .put_object("k", Bytes::from_static(b"one"), PutCondition::Any)
            .await
            .unwrap();
        store
            .put_object("k", Bytes::from_static(b"two"), PutCondition::IfMatch(first.clone()))
            .await
            .unwrap();

        let stale = store
            .put_object("k", Bytes::from_static(b"three"), PutCondition::IfMatch(first))
            .await;
        assert!(matches!(stale, Err(StoreError::ConditionFailed)));
        assert_eq!(
            store.get_object("k").await.unwrap().bytes,
            Bytes::from_static(b"two")
        );
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path()).await.unwrap();
        for key in ["../etc/passwd", "/abs", "", "a/../../b"] {
            assert!(matches!(
                store.get_object(key).await,
                Err(StoreError::InvalidKey(_))
            ));
        }
    }
}
