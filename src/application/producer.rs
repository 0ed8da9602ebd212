use crate::domain::jobs::{Job, TranscodeParams};
use crate::error::RepositoryResult;
use crate::ports::repository::JobRepository;
use tracing::info;

/// Registers uploaded videos as PENDING jobs.
pub struct JobProducer<R> {
    repo: R,
    defaults: TranscodeParams,
}

impl<R: JobRepository> JobProducer<R> {
    pub fn new(repo: R, defaults: TranscodeParams) -> Self {
        Self { repo, defaults }
    }

    pub async fn submit(&self, input_key: &str) -> RepositoryResult<Job> {
        let job = Job::pending(input_key, self.defaults.clone());
        self.repo.put_job(&job).await?;
        info!(job_id = %job.id, input_key, name = %job.name, "Job submitted");
        Ok(job)
    }
}
