use crate::domain::av::MediaEngine;
use crate::domain::jobs::TranscodeParams;
use crate::domain::segment::{padded, transcoded_key, Segment, TranscodedSegment};
use crate::error::{JobError, JobResult, ToolStage};
use crate::ports::storage::StoragePort;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::path::Path;
use tracing::{debug, info};

/// Transcodes chunks concurrently, at most `max_parallel` at a time.
///
/// The first failure aborts the whole batch. Futures still in flight are
/// dropped, which kills their engine processes.
pub struct Dispatcher<'a, S, E> {
    storage: &'a S,
    engine: &'a E,
    max_parallel: usize,
}

impl<'a, S, E> Dispatcher<'a, S, E>
where
    S: StoragePort,
    E: MediaEngine,
{
    pub fn new(storage: &'a S, engine: &'a E, max_parallel: usize) -> Self {
        Self {
            storage,
            engine,
            max_parallel: max_parallel.max(1),
        }
    }

    pub async fn dispatch(
        &self,
        segments: &[Segment],
        params: &TranscodeParams,
        workdir: &Path,
        segments_prefix: &str,
    ) -> JobResult<Vec<TranscodedSegment>> {
        let dir = workdir.join("transcode");
        tokio::fs::create_dir_all(&dir).await?;

        info!(
            count = segments.len(),
            max_parallel = self.max_parallel,
            "Dispatching chunk transcodes"
        );

        // Built eagerly so the stream owns concrete futures rather than a
        // closure over borrowed arguments, which keeps the caller `Send`.
        let tasks: Vec<_> = segments
            .iter()
            .map(|segment| self.transcode_one(segment, params, &dir, segments_prefix))
            .collect();
        let mut done: Vec<TranscodedSegment> = stream::iter(tasks)
            .buffer_unordered(self.max_parallel)
            .try_collect()
            .await?;

        done.sort_by_key(|t| t.index);
        Ok(done)
    }

    async fn transcode_one(
        &self,
        segment: &Segment,
        params: &TranscodeParams,
        dir: &Path,
        segments_prefix: &str,
    ) -> JobResult<TranscodedSegment> {
        let input = dir.join(format!("segment_{}.ts", padded(segment.index)));
        let output = dir.join(format!("transcoded_{}.ts", padded(segment.index)));

        self.storage.download(&segment.key, &input).await?;

        let result = self.engine.transcode_chunk(&input, &output, params).await?;
        if !result.success() {
            return Err(JobError::tool(ToolStage::Transcode, &result));
        }

        let key = transcoded_key(segments_prefix, segment.index);
        self.storage.upload(&output, &key).await?;
        debug!(job_id = %segment.job_id, index = segment.index, "Chunk transcoded");

        Ok(TranscodedSegment {
            job_id: segment.job_id.clone(),
            index: segment.index,
            key,
        })
    }
}
