//! Claim and release of job records.
//!
//! The compare-and-swap on the stored status is the only mutual exclusion
//! between workers. There is no separate lock object.

use crate::domain::jobs::{Job, JobId, JobStatus, JobUpdate, Precondition};
use crate::error::RepositoryResult;
use crate::ports::repository::JobRepository;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, info};

/// Result of a claim attempt. Losing the race is an expected outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// The job now belongs to this worker; carries the record as claimed.
    Claimed(Job),
    /// Another worker moved the job first.
    Conflict,
}

pub struct LeaseCoordinator<R> {
    repo: R,
    worker_id: String,
    ttl: Option<Duration>,
}

impl<R> LeaseCoordinator<R>
where
    R: JobRepository,
{
    pub fn new(repo: R, worker_id: impl Into<String>, ttl: Option<Duration>) -> Self {
        Self {
            repo,
            worker_id: worker_id.into(),
            ttl,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Jobs a claim may succeed on. May already be stale when returned.
    pub async fn list_claimable(&self) -> RepositoryResult<Vec<Job>> {
        let mut jobs = self.repo.scan_by_status(JobStatus::Pending).await?;

        if self.ttl.is_some() {
            let now = Utc::now();
            let expired = self
                .repo
                .scan_by_status(JobStatus::Processing)
                .await?
                .into_iter()
                .filter(|job| job.lease_expired(now));
            jobs.extend(expired);
        }

        Ok(jobs)
    }

    /// Atomically move `job` to PROCESSING on behalf of this worker.
    pub async fn claim(&self, job: &Job) -> RepositoryResult<ClaimOutcome> {
        let now = Utc::now();
        let update = JobUpdate::status(JobStatus::Processing)
            .with_lease(self.worker_id.clone(), self.expiry(now));

        let mut won = self
            .repo
            .compare_and_swap(&job.id, &Precondition::StatusIs(JobStatus::Pending), &update)
            .await?;

        if !won && self.ttl.is_some() {
            won = self
                .repo
                .compare_and_swap(&job.id, &Precondition::LeaseExpired { now }, &update)
                .await?;
            if won {
                info!(
                    job_id = %job.id,
                    previous_owner = job.lease_owner.as_deref().unwrap_or("unknown"),
                    "Reclaimed job with expired lease"
                );
            }
        }

        if !won {
            debug!(job_id = %job.id, worker_id = %self.worker_id, "Claim lost to another worker");
            return Ok(ClaimOutcome::Conflict);
        }

        let mut claimed = job.clone();
        claimed.apply(&update);
        Ok(ClaimOutcome::Claimed(claimed))
    }

    /// Extend the lease. `false` means this worker no longer owns the job.
    pub async fn renew(&self, id: &JobId) -> RepositoryResult<bool> {
        let update = JobUpdate::default().with_lease(self.worker_id.clone(), self.expiry(Utc::now()));
        self.repo
            .compare_and_swap(id, &Precondition::LeaseHeldBy(self.worker_id.clone()), &update)
            .await
    }

    /// Write a terminal status and result fields.
    ///
    /// Without a lease TTL the write is unconditional. With one it only lands
    /// while this worker still holds the lease; `false` means another worker
    /// took the job over and nothing was written.
    pub async fn finalize(
        &self,
        id: &JobId,
        status: JobStatus,
        result: JobUpdate,
    ) -> RepositoryResult<bool> {
        debug_assert!(status.is_terminal(), "finalize called with {}", status);
        let update = JobUpdate {
            status: Some(status),
            ..result
        };
        if self.ttl.is_none() {
            self.repo.update(id, &update).await?;
            return Ok(true);
        }
        self.repo
            .compare_and_swap(id, &Precondition::LeaseHeldBy(self.worker_id.clone()), &update)
            .await
    }

    fn expiry(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .map(|ttl| now + ttl)
    }
}
