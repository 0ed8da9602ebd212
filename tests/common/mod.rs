#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use jetstream::adapters::local::{MemoryJobRepository, MemoryStorage};
use jetstream::application::{JobRunner, LeaseCoordinator};
use jetstream::config::WorkerConfig;
use jetstream::domain::av::{EngineOutput, MediaEngine};
use jetstream::domain::jobs::{Job, JobId, JobStatus, JobUpdate, Precondition, TranscodeParams};
use jetstream::error::{RepositoryError, RepositoryResult, StorageError, StorageResult};
use jetstream::ports::repository::JobRepository;
use jetstream::ports::storage::StoragePort;
use rand::Rng;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[derive(Default)]
pub struct Calls {
    pub split: AtomicUsize,
    pub transcode: AtomicUsize,
    pub concat: AtomicUsize,
    pub package: AtomicUsize,
}

impl Calls {
    pub fn total(&self) -> usize {
        self.split.load(Ordering::SeqCst)
            + self.transcode.load(Ordering::SeqCst)
            + self.concat.load(Ordering::SeqCst)
            + self.package.load(Ordering::SeqCst)
    }
}

/// Media engine that writes recognisable bytes instead of running ffmpeg.
///
/// Chunk `i` holds `chunk-i`, a transcoded chunk wraps its input in `T(..)`
/// and the concatenated output is the transcoded chunks in manifest order.
#[derive(Clone)]
pub struct FakeEngine {
    pub chunks: usize,
    pub fail_chunk: Option<usize>,
    pub max_delay_ms: u64,
    pub split_delay: Duration,
    pub calls: Arc<Calls>,
}

impl FakeEngine {
    pub fn new(chunks: usize) -> Self {
        Self {
            chunks,
            fail_chunk: None,
            max_delay_ms: 0,
            split_delay: Duration::ZERO,
            calls: Arc::new(Calls::default()),
        }
    }
}

#[async_trait]
impl MediaEngine for FakeEngine {
    async fn split(&self, _input: &Path, pattern: &Path, _secs: u64) -> io::Result<EngineOutput> {
        self.calls.split.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.split_delay).await;
        let dir = pattern.parent().expect("pattern has a directory");
        for i in 0..self.chunks {
            tokio::fs::write(dir.join(format!("segment{:05}.ts", i)), format!("chunk-{}", i)).await?;
        }
        Ok(EngineOutput::ok())
    }

    async fn transcode_chunk(
        &self,
        input: &Path,
        output: &Path,
        _params: &TranscodeParams,
    ) -> io::Result<EngineOutput> {
        self.calls.transcode.fetch_add(1, Ordering::SeqCst);
        if self.max_delay_ms > 0 {
            let delay = rand::rng().random_range(0..=self.max_delay_ms);
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let body = tokio::fs::read_to_string(input).await?;
        if let Some(k) = self.fail_chunk {
            if body == format!("chunk-{}", k) {
                return Ok(EngineOutput::failed(1, "Error while encoding"));
            }
        }
        tokio::fs::write(output, format!("T({})", body)).await?;
        Ok(EngineOutput::ok())
    }

    async fn transcode_file(
        &self,
        input: &Path,
        output: &Path,
        _params: &TranscodeParams,
    ) -> io::Result<EngineOutput> {
        self.calls.transcode.fetch_add(1, Ordering::SeqCst);
        let body = tokio::fs::read_to_string(input).await?;
        tokio::fs::write(output, format!("W({})", body)).await?;
        Ok(EngineOutput::ok())
    }

    async fn concat(&self, manifest: &Path, output: &Path) -> io::Result<EngineOutput> {
        self.calls.concat.fetch_add(1, Ordering::SeqCst);
        let dir = manifest.parent().expect("manifest has a directory");
        let list = tokio::fs::read_to_string(manifest).await?;
        let mut merged = String::new();
        for line in list.lines() {
            let name = line.trim_start_matches("file '").trim_end_matches('\'');
            merged.push_str(&tokio::fs::read_to_string(dir.join(name)).await?);
        }
        tokio::fs::write(output, merged).await?;
        Ok(EngineOutput::ok())
    }

    async fn package_hls(
        &self,
        _input: &Path,
        playlist: &Path,
        segment_pattern: &Path,
        _secs: u64,
    ) -> io::Result<EngineOutput> {
        self.calls.package.fetch_add(1, Ordering::SeqCst);
        let dir = playlist.parent().expect("playlist has a directory");
        let pattern = segment_pattern
            .file_name()
            .and_then(|n| n.to_str())
            .expect("utf-8 pattern");
        let mut text = String::from("#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:10\n#EXT-X-MEDIA-SEQUENCE:0\n");
        for i in 0..2 {
            let name = pattern.replace("%05d", &format!("{:05}", i));
            tokio::fs::write(dir.join(&name), b"hls").await?;
            text.push_str(&format!("#EXTINF:10.000000,\n{}\n", name));
        }
        text.push_str("#EXT-X-ENDLIST\n");
        tokio::fs::write(playlist, text).await?;
        Ok(EngineOutput::ok())
    }
}

pub struct Harness {
    pub storage: MemoryStorage,
    pub repo: MemoryJobRepository,
    pub config: WorkerConfig,
    _scratch: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let scratch = TempDir::new().expect("scratch dir");
        let config = WorkerConfig {
            scratch_dir: scratch.path().to_path_buf(),
            min_scratch_bytes: 0,
            max_parallel_transcodes: 4,
            ..WorkerConfig::default()
        };
        Self {
            storage: MemoryStorage::new(),
            repo: MemoryJobRepository::new(),
            config,
            _scratch: scratch,
        }
    }

    /// Upload a source and register a PENDING job for it.
    pub async fn submit(&self, input_key: &str) -> Job {
        self.storage
            .put(input_key, Bytes::from_static(b"source"), "video/mp4")
            .await
            .unwrap();
        let job = Job::pending(input_key, TranscodeParams::default());
        self.repo.put_job(&job).await.unwrap();
        job
    }

    pub fn runner(
        &self,
        worker_id: &str,
        engine: FakeEngine,
    ) -> JobRunner<MemoryStorage, MemoryJobRepository, FakeEngine> {
        self.runner_with(worker_id, self.storage.clone(), self.repo.clone(), engine)
    }

    /// A runner over wrapped stores that still share the harness state.
    pub fn runner_with<S, R>(
        &self,
        worker_id: &str,
        storage: S,
        repo: R,
        engine: FakeEngine,
    ) -> JobRunner<S, R, FakeEngine>
    where
        S: StoragePort,
        R: JobRepository,
    {
        let lease = LeaseCoordinator::new(repo, worker_id, self.config.lease_ttl);
        JobRunner::new(storage, lease, engine, self.config.clone())
    }

    pub async fn stored(&self, job: &Job) -> Job {
        self.repo.get_job(&job.id).await.unwrap().unwrap()
    }
}

/// Blob store whose playlist uploads always fail.
#[derive(Clone)]
pub struct RejectPlaylists(pub MemoryStorage);

#[async_trait]
impl StoragePort for RejectPlaylists {
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.0.get(key).await
    }

    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> StorageResult<()> {
        if key.ends_with(".m3u8") {
            return Err(StorageError::backend("throttled"));
        }
        self.0.put(key, body, content_type).await
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.0.exists(key).await
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.0.list(prefix).await
    }

    async fn delete_many(&self, keys: &[String]) -> StorageResult<()> {
        self.0.delete_many(keys).await
    }
}

/// Job store that cannot be reached for lease renewals.
#[derive(Clone)]
pub struct UnreachableRenewals(pub MemoryJobRepository);

#[async_trait]
impl JobRepository for UnreachableRenewals {
    async fn scan_by_status(&self, status: JobStatus) -> RepositoryResult<Vec<Job>> {
        self.0.scan_by_status(status).await
    }

    async fn get_job(&self, id: &JobId) -> RepositoryResult<Option<Job>> {
        self.0.get_job(id).await
    }

    async fn put_job(&self, job: &Job) -> RepositoryResult<()> {
        self.0.put_job(job).await
    }

    async fn compare_and_swap(
        &self,
        id: &JobId,
        precondition: &Precondition,
        update: &JobUpdate,
    ) -> RepositoryResult<bool> {
        if matches!(precondition, Precondition::LeaseHeldBy(_)) {
            return Err(RepositoryError::backend("connection reset"));
        }
        self.0.compare_and_swap(id, precondition, update).await
    }

    async fn update(&self, id: &JobId, update: &JobUpdate) -> RepositoryResult<()> {
        self.0.update(id, update).await
    }
}
