use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncWriteExt};

#[async_trait]
pub trait StoragePort: Send + Sync {
    /// Fetch an object; a missing key is `StorageError::NotFound`.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> StorageResult<()>;

    /// HEAD the key.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Every key starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Delete the given keys. Missing keys are not an error.
    async fn delete_many(&self, keys: &[String]) -> StorageResult<()>;

    /// Download an object from storage to a local path
    ///
    /// The default buffers the whole object; backends with a streaming body
    /// should override it with [`copy_to_file`].
    async fn download(&self, key: &str, local_path: &Path) -> StorageResult<()> {
        let body = self.get(key).await?;
        copy_to_file(&mut body.as_ref(), local_path).await?;
        Ok(())
    }

    /// Upload a file from a local path to storage
    async fn upload(&self, local_path: &Path, key: &str) -> StorageResult<()> {
        let body = tokio::fs::read(local_path).await?;
        self.put(key, Bytes::from(body), content_type_for(key))
            .await
    }
}

/// Write `reader` to `local_path` chunk by chunk, creating parent directories.
/// Returns the number of bytes written.
pub async fn copy_to_file<Rd>(reader: &mut Rd, local_path: &Path) -> StorageResult<u64>
where
    Rd: AsyncRead + Unpin + ?Sized,
{
    if let Some(parent) = local_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::File::create(local_path).await?;
    let written = tokio::io::copy(reader, &mut file).await?;
    file.flush().await?;
    Ok(written)
}

/// Content type derived from the key's extension.
pub fn content_type_for(key: &str) -> &'static str {
    let ext = key.rsplit_once('.').map(|(_, ext)| ext).unwrap_or_default();
    match ext.to_ascii_lowercase().as_str() {
        "ts" => "video/mp2t",
        "m3u8" => "application/vnd.apple.mpegurl",
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        _ => "application/octet-stream",
    }
}

pub(crate) fn validate_key(key: &str) -> StorageResult<()> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.split('/').any(|part| part == ".." || part == ".");
    if bad {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}
