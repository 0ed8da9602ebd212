//! In-process adapters.
//!
//! Both stores are cheap to clone and share their state, so several runners
//! in one process (or one test) see the same records, the way separate
//! workers share a remote table.

use crate::domain::jobs::{Job, JobId, JobStatus, JobUpdate, Precondition};
use crate::error::{RepositoryError, RepositoryResult, StorageError, StorageResult};
use crate::ports::repository::JobRepository;
use crate::ports::storage::{validate_key, StoragePort};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub body: Bytes,
    pub content_type: String,
}

#[derive(Clone, Default)]
pub struct MemoryStorage {
    objects: Arc<Mutex<BTreeMap<String, StoredObject>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn keys(&self) -> Vec<String> {
        self.objects.lock().await.keys().cloned().collect()
    }

    pub async fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().await.get(key).cloned()
    }
}

#[async_trait]
impl StoragePort for MemoryStorage {
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.objects
            .lock()
            .await
            .get(key)
            .map(|o| o.body.clone())
            .ok_or_else(|| StorageError::not_found(key))
    }

    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> StorageResult<()> {
        validate_key(key)?;
        self.objects.lock().await.insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.objects.lock().await.contains_key(key))
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .objects
            .lock()
            .await
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn delete_many(&self, keys: &[String]) -> StorageResult<()> {
        let mut objects = self.objects.lock().await;
        for key in keys {
            objects.remove(key);
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct MemoryJobRepository {
    jobs: Arc<Mutex<HashMap<JobId, Job>>>,
}

impl MemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepository for MemoryJobRepository {
    async fn scan_by_status(&self, status: JobStatus) -> RepositoryResult<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .jobs
            .lock()
            .await
            .values()
            .filter(|j| j.status == status)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(jobs)
    }

    async fn get_job(&self, id: &JobId) -> RepositoryResult<Option<Job>> {
        Ok(self.jobs.lock().await.get(id).cloned())
    }

    async fn put_job(&self, job: &Job) -> RepositoryResult<()> {
        self.jobs.lock().await.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        id: &JobId,
        precondition: &Precondition,
        update: &JobUpdate,
    ) -> RepositoryResult<bool> {
        let mut jobs = self.jobs.lock().await;
        match jobs.get_mut(id) {
            Some(job) if job.satisfies(precondition) => {
                job.apply(update);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update(&self, id: &JobId, update: &JobUpdate) -> RepositoryResult<()> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        job.apply(update);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::jobs::TranscodeParams;

    #[tokio::test]
    async fn test_list_by_prefix() {
        let store = MemoryStorage::new();
        for key in ["a/1.ts", "a/2.ts", "ab/3.ts", "b/4.ts"] {
            store.put(key, Bytes::new(), "video/mp2t").await.unwrap();
        }
        assert_eq!(store.list("a/").await.unwrap(), vec!["a/1.ts", "a/2.ts"]);
        assert_eq!(store.list("a").await.unwrap().len(), 3);
        assert!(store.list("c/").await.unwrap().is_empty());
        assert!(matches!(store.get("c/5.ts").await, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_compare_and_swap_only_once() {
        let repo = MemoryJobRepository::new();
        let job = Job::pending("videos/u1_clip.mp4", TranscodeParams::default());
        repo.put_job(&job).await.unwrap();

        let pending = Precondition::StatusIs(JobStatus::Pending);
        let claim = JobUpdate::status(JobStatus::Processing);
        assert!(repo.compare_and_swap(&job.id, &pending, &claim).await.unwrap());
        assert!(!repo.compare_and_swap(&job.id, &pending, &claim).await.unwrap());
        assert!(!repo
            .compare_and_swap(&JobId::from("missing"), &pending, &claim)
            .await
            .unwrap());

        let stored = repo.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn test_update_missing_job() {
        let repo = MemoryJobRepository::new();
        let result = repo
            .update(&JobId::from("nope"), &JobUpdate::status(JobStatus::Failed))
            .await;
        assert!(matches!(result, Err(RepositoryError::NotFound(_))));
    }
}
