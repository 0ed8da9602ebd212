use crate::domain::jobs::{Job, JobId, JobStatus, JobUpdate, Precondition};
use crate::error::RepositoryResult;
use async_trait::async_trait;

#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Every job currently in `status`.
    async fn scan_by_status(&self, status: JobStatus) -> RepositoryResult<Vec<Job>>;

    async fn get_job(&self, id: &JobId) -> RepositoryResult<Option<Job>>;

    /// Insert a new record
    async fn put_job(&self, job: &Job) -> RepositoryResult<()>;

    /// Apply `update` only if the stored record satisfies `precondition`.
    /// Returns `false` when the condition does not hold; that is not an error.
    async fn compare_and_swap(
        &self,
        id: &JobId,
        precondition: &Precondition,
        update: &JobUpdate,
    ) -> RepositoryResult<bool>;

    /// Apply `update` whatever the stored state is.
    async fn update(&self, id: &JobId, update: &JobUpdate) -> RepositoryResult<()>;
}
