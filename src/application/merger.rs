use crate::domain::av::MediaEngine;
use crate::domain::hls::MediaPlaylist;
use crate::domain::jobs::Job;
use crate::domain::segment::{padded, TranscodedSegment};
use crate::error::{JobError, JobResult, ToolStage};
use crate::ports::storage::StoragePort;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const CONCAT_LIST: &str = "files_list.txt";

/// Keys of everything a successful merge published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutput {
    pub output_key: String,
    pub hls_output_key: String,
}

/// Joins transcoded chunks into the final container and packages it as HLS.
pub struct Merger<'a, S, E> {
    storage: &'a S,
    engine: &'a E,
    hls_segment_seconds: u64,
}

impl<'a, S, E> Merger<'a, S, E>
where
    S: StoragePort,
    E: MediaEngine,
{
    pub fn new(storage: &'a S, engine: &'a E, hls_segment_seconds: u64) -> Self {
        Self {
            storage,
            engine,
            hls_segment_seconds,
        }
    }

    /// `transcoded` must already be in index order.
    pub async fn merge(
        &self,
        job: &Job,
        transcoded: &[TranscodedSegment],
        workdir: &Path,
        output_prefix: &str,
    ) -> JobResult<MergeOutput> {
        if transcoded.is_empty() {
            return Err(JobError::EmptyManifest);
        }

        let dir = workdir.join("merge");
        tokio::fs::create_dir_all(&dir).await?;

        let mut list = String::new();
        for segment in transcoded {
            let name = format!("chunk_{}.ts", padded(segment.index));
            self.storage.download(&segment.key, &dir.join(&name)).await?;
            // The engine reads entries relative to the list file.
            let _ = writeln!(list, "file '{}'", name);
        }
        let list_path = dir.join(CONCAT_LIST);
        tokio::fs::write(&list_path, list).await?;

        let stem = job.stem();
        let output_key = job.final_output_key(output_prefix);
        let output_name = format!("{}_transcoded.{}", stem, job.params.output_format);
        let output_path = dir.join(&output_name);

        info!(job_id = %job.id, chunks = transcoded.len(), "Concatenating chunks");
        let concat = self.engine.concat(&list_path, &output_path).await?;
        if !concat.success() {
            return Err(JobError::tool(ToolStage::Concat, &concat));
        }

        let playlist_name = format!("hls_{}.m3u8", stem);
        let playlist_path = dir.join(&playlist_name);
        let pattern = dir.join(format!("hls_{}_%05d.ts", stem));

        info!(job_id = %job.id, "Packaging HLS");
        let package = self
            .engine
            .package_hls(&output_path, &playlist_path, &pattern, self.hls_segment_seconds)
            .await?;
        if !package.success() {
            return Err(JobError::tool(ToolStage::Package, &package));
        }

        let playlist = MediaPlaylist::read_from(&playlist_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::InvalidData {
                warn!(job_id = %job.id, error = %e, "Unreadable playlist");
                JobError::EmptyPlaylist
            } else {
                JobError::Io(e)
            }
        })?;
        if playlist.segments.is_empty() {
            return Err(JobError::EmptyPlaylist);
        }

        // The container marks the job as done, so it goes up last. Anything
        // published before a failure is withdrawn again.
        let hls_output_key = format!("{}{}", output_prefix, playlist_name);
        let mut uploads: Vec<(PathBuf, String)> = playlist
            .segments
            .iter()
            .map(|segment| (dir.join(&segment.uri), format!("{}{}", output_prefix, segment.uri)))
            .collect();
        uploads.push((playlist_path, hls_output_key.clone()));
        uploads.push((output_path, output_key.clone()));

        let mut published = Vec::with_capacity(uploads.len());
        for (path, key) in uploads {
            if let Err(e) = self.storage.upload(&path, &key).await {
                self.withdraw(job, &published).await;
                return Err(e.into());
            }
            published.push(key);
        }

        info!(
            job_id = %job.id,
            output_key = %output_key,
            hls_output_key = %hls_output_key,
            playlist_seconds = playlist.total_duration(),
            "Merged output published"
        );

        Ok(MergeOutput {
            output_key,
            hls_output_key,
        })
    }

    async fn withdraw(&self, job: &Job, keys: &[String]) {
        if keys.is_empty() {
            return;
        }
        if let Err(e) = self.storage.delete_many(keys).await {
            warn!(job_id = %job.id, error = %e, "Could not withdraw partial output");
        }
    }
}
