use crate::error::{StorageError, StorageResult};
use crate::ports::storage::{validate_key, StoragePort};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Blob store backed by a local directory; keys are relative paths under it.
#[derive(Clone, Debug)]
pub struct FsAdapter {
    root: PathBuf,
}

impl FsAdapter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<_> = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<_>>()?;
        Some(parts.join("/"))
    }
}

#[async_trait]
impl StoragePort for FsAdapter {
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::not_found(key)),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, body: Bytes, _content_type: &str) -> StorageResult<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &body).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.path_for(key)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else if let Some(key) = self.key_for(&path) {
                    if key.starts_with(prefix) {
                        keys.push(key);
                    }
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn delete_many(&self, keys: &[String]) -> StorageResult<()> {
        for key in keys {
            let path = self.path_for(key)?;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    // Same-filesystem copies avoid buffering whole videos in memory.
    async fn download(&self, key: &str, local_path: &Path) -> StorageResult<()> {
        let key_path = self.path_for(key)?;
        if key_path != local_path {
            if let Some(parent) = local_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            match tokio::fs::copy(&key_path, local_path).await {
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    return Err(StorageError::not_found(key))
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn upload(&self, local_path: &Path, key: &str) -> StorageResult<()> {
        let key_path = self.path_for(key)?;
        if key_path != local_path {
            if let Some(parent) = key_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(local_path, &key_path).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_put_get_list_delete() {
        let dir = tempdir().unwrap();
        let store = FsAdapter::new(dir.path());

        store
            .put("transcoded/segments/j1/segment_00000.ts", Bytes::from("a"), "video/mp2t")
            .await
            .unwrap();
        store
            .put("transcoded/segments/j1/segment_00001.ts", Bytes::from("b"), "video/mp2t")
            .await
            .unwrap();
        store
            .put("transcoded/clip_transcoded.mp4", Bytes::from("c"), "video/mp4")
            .await
            .unwrap();

        assert!(store.exists("transcoded/clip_transcoded.mp4").await.unwrap());
        assert!(!store.exists("transcoded/missing.mp4").await.unwrap());
        assert_eq!(
            store.get("transcoded/segments/j1/segment_00001.ts").await.unwrap(),
            Bytes::from("b")
        );

        let keys = store.list("transcoded/segments/j1/").await.unwrap();
        assert_eq!(
            keys,
            vec![
                "transcoded/segments/j1/segment_00000.ts",
                "transcoded/segments/j1/segment_00001.ts"
            ]
        );

        store.delete_many(&keys).await.unwrap();
        assert!(store.list("transcoded/segments/").await.unwrap().is_empty());
        assert_eq!(store.list("transcoded/").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_key_is_not_found() {
        let dir = tempdir().unwrap();
        let store = FsAdapter::new(dir.path());

        assert!(matches!(
            store.get("videos/none.mp4").await,
            Err(StorageError::NotFound(_))
        ));
        let target = dir.path().join("scratch").join("none.mp4");
        assert!(matches!(
            store.download("videos/none.mp4", &target).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let dir = tempdir().unwrap();
        let store = FsAdapter::new(dir.path());
        assert!(matches!(
            store.exists("../outside").await,
            Err(StorageError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn test_upload_and_download_files() {
        let dir = tempdir().unwrap();
        let scratch = tempdir().unwrap();
        let store = FsAdapter::new(dir.path());

        let local = scratch.path().join("in.mp4");
        tokio::fs::write(&local, b"video").await.unwrap();
        store.upload(&local, "videos/u1_in.mp4").await.unwrap();

        let back = scratch.path().join("nested").join("copy.mp4");
        store.download("videos/u1_in.mp4", &back).await.unwrap();
        assert_eq!(tokio::fs::read(&back).await.unwrap(), b"video");
    }
}
