use crate::domain::av::scratch::{check_scratch_space, ScratchSpace};
use crate::domain::av::MediaEngine;
use crate::domain::jobs::Job;
use crate::domain::segment::{parse_split_index, segment_key, Segment, SPLIT_PATTERN};
use crate::error::{JobError, JobResult, ToolStage};
use crate::ports::storage::StoragePort;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Splits a source file into fixed-duration chunks and stages them in the
/// blob store.
pub struct Segmenter<'a, S, E> {
    storage: &'a S,
    engine: &'a E,
    chunk_seconds: u64,
    min_scratch_bytes: u64,
}

impl<'a, S, E> Segmenter<'a, S, E>
where
    S: StoragePort,
    E: MediaEngine,
{
    pub fn new(storage: &'a S, engine: &'a E, chunk_seconds: u64, min_scratch_bytes: u64) -> Self {
        Self {
            storage,
            engine,
            chunk_seconds,
            min_scratch_bytes,
        }
    }

    /// Returns the uploaded chunks in index order.
    pub async fn segment(
        &self,
        job: &Job,
        source: &Path,
        workdir: &Path,
        segments_prefix: &str,
    ) -> JobResult<Vec<Segment>> {
        ensure_scratch(workdir, self.min_scratch_bytes).await?;

        let chunk_dir = workdir.join("chunks");
        tokio::fs::create_dir_all(&chunk_dir).await?;

        info!(job_id = %job.id, chunk_seconds = self.chunk_seconds, "Splitting source");
        let output = self
            .engine
            .split(source, &chunk_dir.join(SPLIT_PATTERN), self.chunk_seconds)
            .await?;
        if !output.success() {
            return Err(JobError::tool(ToolStage::Split, &output));
        }

        let chunks = list_chunks(&chunk_dir).await?;
        if chunks.is_empty() {
            return Err(JobError::NoSegments);
        }

        let mut segments = Vec::with_capacity(chunks.len());
        for (index, path) in chunks {
            let key = segment_key(segments_prefix, index);
            self.storage.upload(&path, &key).await?;
            debug!(job_id = %job.id, index, key = %key, "Uploaded chunk");
            segments.push(Segment {
                job_id: job.id.clone(),
                index,
                key,
            });
        }

        info!(job_id = %job.id, count = segments.len(), "Source split");
        Ok(segments)
    }
}

/// Fail with a resource error when the scratch disk is too full.
pub(crate) async fn ensure_scratch(path: &Path, required_bytes: u64) -> JobResult<()> {
    match check_scratch_space(path, required_bytes).await {
        ScratchSpace::Sufficient { .. } => Ok(()),
        ScratchSpace::Insufficient {
            available_bytes,
            required_bytes,
        } => Err(JobError::InsufficientScratch {
            path: path.to_path_buf(),
            available: available_bytes,
            required: required_bytes,
        }),
    }
}

async fn list_chunks(dir: &Path) -> JobResult<Vec<(usize, PathBuf)>> {
    let mut chunks = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        if let Some(index) = name.to_str().and_then(parse_split_index) {
            chunks.push((index, entry.path()));
        }
    }
    chunks.sort_by_key(|(index, _)| *index);
    Ok(chunks)
}
