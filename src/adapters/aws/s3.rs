use crate::error::{StorageError, StorageResult};
use crate::ports::storage::{copy_to_file, StoragePort};
use async_trait::async_trait;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::operation::get_object::{GetObjectError, GetObjectOutput};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use aws_sdk_s3::Client;
use bytes::Bytes;
use std::path::Path;
use tracing::debug;

/// S3 caps DeleteObjects at this many keys per request.
const DELETE_BATCH: usize = 1000;

/// S3Adapter implements StoragePort for AWS S3.
#[derive(Clone)]
pub struct S3Adapter {
    client: Client,
    bucket: String,
}

impl S3Adapter {
    pub fn new(client: Client, bucket: String) -> Self {
        Self { client, bucket }
    }

    async fn get_object(&self, key: &str) -> StorageResult<GetObjectOutput> {
        self.client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| get_error(key, e))
    }
}

fn get_error(key: &str, e: SdkError<GetObjectError>) -> StorageError {
    if e.as_service_error().map(|se| se.is_no_such_key()) == Some(true) {
        StorageError::not_found(key)
    } else {
        StorageError::backend(DisplayErrorContext(&e))
    }
}

#[async_trait]
impl StoragePort for S3Adapter {
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let resp = self.get_object(key).await?;
        let body = resp
            .body
            .collect()
            .await
            .map_err(|e| StorageError::backend(format!("reading {}: {}", key, e)))?;
        Ok(body.into_bytes())
    }

    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> StorageResult<()> {
        debug!("Uploading {} bytes to s3://{}/{}", body.len(), self.bucket, key);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::backend(DisplayErrorContext(&e)))?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().map(|se| se.is_not_found()) == Some(true) => Ok(false),
            Err(e) => Err(StorageError::backend(DisplayErrorContext(&e))),
        }
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let resp = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| StorageError::backend(DisplayErrorContext(&e)))?;

            keys.extend(
                resp.contents()
                    .iter()
                    .filter_map(|obj| obj.key().map(str::to_string)),
            );

            match resp.next_continuation_token() {
                Some(token) if resp.is_truncated() == Some(true) => {
                    continuation = Some(token.to_string())
                }
                _ => break,
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn delete_many(&self, keys: &[String]) -> StorageResult<()> {
        for batch in keys.chunks(DELETE_BATCH) {
            let objects = batch
                .iter()
                .map(|k| ObjectIdentifier::builder().key(k).build())
                .collect::<Result<Vec<_>, _>>()
                .map_err(StorageError::backend)?;
            let delete = Delete::builder()
                .set_objects(Some(objects))
                .quiet(true)
                .build()
                .map_err(StorageError::backend)?;

            let resp = self
                .client
                .delete_objects()
                .bucket(&self.bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| StorageError::backend(DisplayErrorContext(&e)))?;

            if let Some(first) = resp.errors().first() {
                return Err(StorageError::backend(format!(
                    "{} of {} deletions failed, first {}: {}",
                    resp.errors().len(),
                    batch.len(),
                    first.key().unwrap_or("?"),
                    first.message().unwrap_or("unknown error")
                )));
            }
        }
        Ok(())
    }

    // Streams the body to disk instead of collecting it first.
    async fn download(&self, key: &str, local_path: &Path) -> StorageResult<()> {
        let resp = self.get_object(key).await?;
        let reader = resp.body.into_async_read();
        tokio::pin!(reader);
        let written = copy_to_file(&mut reader, local_path).await?;
        debug!("Downloaded {} bytes from s3://{}/{}", written, self.bucket, key);
        Ok(())
    }

    // Streams from disk instead of reading the whole file into memory.
    async fn upload(&self, local_path: &Path, key: &str) -> StorageResult<()> {
        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| StorageError::backend(format!("{}: {}", local_path.display(), e)))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(crate::ports::storage::content_type_for(key))
            .send()
            .await
            .map_err(|e| StorageError::backend(DisplayErrorContext(&e)))?;
        Ok(())
    }
}
