//! Drives one job from claim to terminal status.

use super::dispatcher::Dispatcher;
use super::lease::{ClaimOutcome, LeaseCoordinator};
use super::merger::Merger;
use super::segmenter::{ensure_scratch, Segmenter};
use crate::config::WorkerConfig;
use crate::domain::av::MediaEngine;
use crate::domain::jobs::{Job, JobId, JobStatus, JobUpdate, Mode};
use crate::error::{JobError, JobResult, RepositoryResult, ToolStage};
use crate::ports::repository::JobRepository;
use crate::ports::storage::StoragePort;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing::{debug, error, info, warn};

/// What happened to a job handed to [`JobRunner::run`].
#[derive(Debug)]
pub enum RunOutcome {
    /// Another worker holds the job.
    Skipped,
    /// The final output already existed; marked COMPLETED without work.
    AlreadyComplete { output_key: String },
    Completed {
        output_key: String,
        hls_output_key: Option<String>,
        duration_seconds: f64,
        mode: Mode,
    },
    /// Marked FAILED.
    Failed(JobError),
    /// Ownership moved to another worker mid-run; nothing was written.
    LeaseLost,
}

enum Execution {
    AlreadyComplete(String),
    Produced {
        output_key: String,
        hls_output_key: Option<String>,
        intermediates: Vec<String>,
    },
}

pub struct JobRunner<S, R, E> {
    storage: S,
    lease: LeaseCoordinator<R>,
    engine: E,
    config: WorkerConfig,
}

impl<S, R, E> JobRunner<S, R, E>
where
    S: StoragePort,
    R: JobRepository,
    E: MediaEngine,
{
    pub fn new(storage: S, lease: LeaseCoordinator<R>, engine: E, config: WorkerConfig) -> Self {
        Self {
            storage,
            lease,
            engine,
            config,
        }
    }

    pub fn lease(&self) -> &LeaseCoordinator<R> {
        &self.lease
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Claim `job` and, if the claim wins, run it to a terminal status.
    ///
    /// Job failures are reported as [`RunOutcome::Failed`]. An `Err` means
    /// the job store itself could not be reached to claim or finalize.
    pub async fn run(&self, job: &Job) -> RepositoryResult<RunOutcome> {
        let job = match self.lease.claim(job).await? {
            ClaimOutcome::Claimed(job) => job,
            ClaimOutcome::Conflict => return Ok(RunOutcome::Skipped),
        };
        info!(
            job_id = %job.id,
            input_key = %job.input_key,
            worker_id = %self.lease.worker_id(),
            "Claimed job"
        );

        let started = Instant::now();
        let work = AssertUnwindSafe(self.execute(&job))
            .catch_unwind()
            .map(|caught| {
                caught.unwrap_or_else(|panic| Err(JobError::unexpected(panic_message(&*panic))))
            });

        let result = match self.lease.ttl() {
            Some(ttl) => tokio::select! {
                result = work => result,
                _ = self.heartbeat(&job.id, ttl) => {
                    warn!(job_id = %job.id, "Lease lost, abandoning job");
                    return Ok(RunOutcome::LeaseLost);
                }
            },
            None => work.await,
        };
        let duration_seconds = started.elapsed().as_secs_f64();

        match result {
            Ok(Execution::AlreadyComplete(output_key)) => {
                info!(job_id = %job.id, output_key = %output_key, "Output already exists, skipping work");
                let update = JobUpdate::default().with_output_key(output_key.clone());
                if !self.finalize(&job.id, JobStatus::Completed, update).await? {
                    return Ok(RunOutcome::LeaseLost);
                }
                Ok(RunOutcome::AlreadyComplete { output_key })
            }
            Ok(Execution::Produced {
                output_key,
                hls_output_key,
                intermediates,
            }) => {
                let mode = self.config.mode;
                let mut update = JobUpdate::default()
                    .with_output_key(output_key.clone())
                    .with_duration(duration_seconds)
                    .with_mode(mode);
                if let Some(key) = &hls_output_key {
                    update = update.with_hls_output_key(key.clone());
                }
                if !self.finalize(&job.id, JobStatus::Completed, update).await? {
                    return Ok(RunOutcome::LeaseLost);
                }
                info!(
                    job_id = %job.id,
                    output_key = %output_key,
                    duration_seconds,
                    mode = %mode,
                    "Job completed"
                );

                if mode == Mode::Parallel {
                    self.cleanup(&job, intermediates).await;
                }

                Ok(RunOutcome::Completed {
                    output_key,
                    hls_output_key,
                    duration_seconds,
                    mode,
                })
            }
            Err(err) => {
                error!(
                    job_id = %job.id,
                    kind = ?err.kind(),
                    error = %err,
                    duration_seconds,
                    "Job failed"
                );
                let update = JobUpdate::default().with_duration(duration_seconds);
                if !self.finalize(&job.id, JobStatus::Failed, update).await? {
                    return Ok(RunOutcome::LeaseLost);
                }
                Ok(RunOutcome::Failed(err))
            }
        }
    }

    /// `false` when another worker owns the job by now; nothing was written.
    async fn finalize(&self, id: &JobId, status: JobStatus, update: JobUpdate) -> RepositoryResult<bool> {
        let written = self.lease.finalize(id, status, update).await?;
        if !written {
            warn!(job_id = %id, status = %status, "Lease taken over before finalize, result dropped");
        }
        Ok(written)
    }

    async fn execute(&self, job: &Job) -> JobResult<Execution> {
        let output_key = job.final_output_key(&self.config.output_prefix);
        if self.storage.exists(&output_key).await? {
            return Ok(Execution::AlreadyComplete(output_key));
        }
        if !self.storage.exists(&job.input_key).await? {
            return Err(JobError::InputNotFound(job.input_key.clone()));
        }

        let workdir = self.scratch_dir(job).await?;
        let source = workdir.path().join(source_file_name(&job.input_key));
        self.storage.download(&job.input_key, &source).await?;
        debug!(job_id = %job.id, path = %source.display(), "Input downloaded");

        match self.config.mode {
            Mode::Parallel => self.run_parallel(job, &source, workdir.path()).await,
            Mode::Single => self.run_single(job, &source, workdir.path(), output_key).await,
        }
    }

    async fn run_parallel(&self, job: &Job, source: &Path, workdir: &Path) -> JobResult<Execution> {
        let prefix = job.segments_prefix(&self.config.output_prefix);

        let segments = Segmenter::new(
            &self.storage,
            &self.engine,
            self.config.chunk_seconds,
            self.config.min_scratch_bytes,
        )
        .segment(job, source, workdir, &prefix)
        .await?;

        let transcoded = Dispatcher::new(&self.storage, &self.engine, self.config.max_parallel_transcodes)
            .dispatch(&segments, &job.params, workdir, &prefix)
            .await?;

        let merged = Merger::new(&self.storage, &self.engine, self.config.hls_segment_seconds)
            .merge(job, &transcoded, workdir, &self.config.output_prefix)
            .await?;

        let intermediates = segments
            .into_iter()
            .map(|s| s.key)
            .chain(transcoded.into_iter().map(|t| t.key))
            .collect();

        Ok(Execution::Produced {
            output_key: merged.output_key,
            hls_output_key: Some(merged.hls_output_key),
            intermediates,
        })
    }

    async fn run_single(
        &self,
        job: &Job,
        source: &Path,
        workdir: &Path,
        output_key: String,
    ) -> JobResult<Execution> {
        ensure_scratch(workdir, self.config.min_scratch_bytes).await?;

        let output = workdir.join(format!("{}_transcoded.{}", job.stem(), job.params.output_format));
        info!(job_id = %job.id, "Transcoding whole file");
        let result = self.engine.transcode_file(source, &output, &job.params).await?;
        if !result.success() {
            return Err(JobError::tool(ToolStage::Transcode, &result));
        }

        self.storage.upload(&output, &output_key).await?;
        Ok(Execution::Produced {
            output_key,
            hls_output_key: None,
            intermediates: Vec::new(),
        })
    }

    async fn scratch_dir(&self, job: &Job) -> JobResult<TempDir> {
        tokio::fs::create_dir_all(&self.config.scratch_dir).await?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("jetstream-{}-", job.id))
            .tempdir_in(&self.config.scratch_dir)?;
        Ok(dir)
    }

    /// Best effort; failures never change the job status.
    async fn cleanup(&self, job: &Job, mut keys: Vec<String>) {
        let prefix = job.segments_prefix(&self.config.output_prefix);
        match self.storage.list(&prefix).await {
            Ok(listed) => keys.extend(listed),
            Err(e) => warn!(job_id = %job.id, error = %e, "Could not list intermediates"),
        }
        keys.sort();
        keys.dedup();

        if keys.is_empty() {
            return;
        }
        match self.storage.delete_many(&keys).await {
            Ok(()) => debug!(job_id = %job.id, count = keys.len(), "Intermediates removed"),
            Err(e) => warn!(job_id = %job.id, error = %e, "Cleanup failed"),
        }
    }

    /// Renews the lease every third of its lifetime. Returns once ownership is
    /// lost, or once renewals have failed for a whole TTL and another worker
    /// may already have reclaimed the job.
    async fn heartbeat(&self, id: &JobId, ttl: Duration) {
        let mut ticker = tokio::time::interval((ttl / 3).max(Duration::from_millis(10)));
        ticker.tick().await;
        let mut last_renewed = Instant::now();
        loop {
            ticker.tick().await;
            match self.lease.renew(id).await {
                Ok(true) => {
                    last_renewed = Instant::now();
                    debug!(job_id = %id, "Lease renewed");
                }
                Ok(false) => return,
                Err(e) if last_renewed.elapsed() >= ttl => {
                    warn!(job_id = %id, error = %e, "Lease renewals failed for a full TTL");
                    return;
                }
                Err(e) => warn!(job_id = %id, error = %e, "Lease renewal failed"),
            }
        }
    }
}

fn source_file_name(input_key: &str) -> String {
    match Path::new(input_key).extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("source.{}", ext),
        None => "source".to_string(),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "pipeline panicked".to_string())
}
