use super::runner::{JobRunner, RunOutcome};
use crate::domain::av::MediaEngine;
use crate::error::RepositoryResult;
use crate::ports::repository::JobRepository;
use crate::ports::storage::StoragePort;
use rand::Rng;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Repeatedly scans the job store and runs whatever it can claim.
pub struct Poller<S, R, E> {
    runner: JobRunner<S, R, E>,
    interval: Duration,
    jitter: Duration,
}

impl<S, R, E> Poller<S, R, E>
where
    S: StoragePort,
    R: JobRepository,
    E: MediaEngine,
{
    pub fn new(runner: JobRunner<S, R, E>) -> Self {
        let interval = runner.config().poll_interval;
        let jitter = runner.config().poll_jitter;
        Self {
            runner,
            interval,
            jitter,
        }
    }

    pub fn runner(&self) -> &JobRunner<S, R, E> {
        &self.runner
    }

    /// Poll until `shutdown` fires. A job already running is always finished.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            worker_id = %self.runner.lease().worker_id(),
            interval_secs = self.interval.as_secs(),
            "Polling for jobs"
        );

        while !shutdown.is_cancelled() {
            if let Err(e) = self.pass(Some(&shutdown)).await {
                error!(error = %e, "Failed to list jobs");
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.next_sleep()) => {}
            }
        }

        info!("Poller stopped");
    }

    /// One scan over the claimable jobs.
    pub async fn run_once(&self) -> RepositoryResult<Vec<RunOutcome>> {
        self.pass(None).await
    }

    async fn pass(&self, shutdown: Option<&CancellationToken>) -> RepositoryResult<Vec<RunOutcome>> {
        let jobs = self.runner.lease().list_claimable().await?;
        debug!(count = jobs.len(), "Claimable jobs");

        let mut outcomes = Vec::with_capacity(jobs.len());
        for job in &jobs {
            if shutdown.is_some_and(|s| s.is_cancelled()) {
                break;
            }
            match self.runner.run(job).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!(job_id = %job.id, error = %e, "Job store unavailable"),
            }
        }
        Ok(outcomes)
    }

    fn next_sleep(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.interval;
        }
        self.interval + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }
}
