//! External media engine invocations.
//!
//! Every stage of the pipeline shells out to ffmpeg. The trait keeps those
//! four invocations behind a seam so the stages can be driven by a mock.

use crate::domain::jobs::TranscodeParams;
use async_trait::async_trait;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command as TokioCommand;
use tracing::debug;

/// Exit status and diagnostics of one engine run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOutput {
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stderr: String,
}

impl EngineOutput {
    pub fn ok() -> Self {
        Self {
            code: Some(0),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Last lines of stderr, enough to diagnose without flooding the log.
    pub fn stderr_tail(&self) -> String {
        let lines: Vec<&str> = self.stderr.lines().collect();
        let start = lines.len().saturating_sub(10);
        lines[start..].join("\n")
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Stream-copy `input` into fixed-duration chunks named after `pattern`.
    async fn split(&self, input: &Path, pattern: &Path, chunk_seconds: u64)
        -> io::Result<EngineOutput>;

    /// Re-encode one chunk as MPEG-TS with the requested scale and codec.
    async fn transcode_chunk(
        &self,
        input: &Path,
        output: &Path,
        params: &TranscodeParams,
    ) -> io::Result<EngineOutput>;

    /// Re-encode a whole file; the container follows the output extension.
    async fn transcode_file(
        &self,
        input: &Path,
        output: &Path,
        params: &TranscodeParams,
    ) -> io::Result<EngineOutput>;

    /// Stream-copy the files listed in a concat `manifest` into `output`.
    async fn concat(&self, manifest: &Path, output: &Path) -> io::Result<EngineOutput>;

    /// Repackage `input` into an HLS playlist plus segments.
    async fn package_hls(
        &self,
        input: &Path,
        playlist: &Path,
        segment_pattern: &Path,
        segment_seconds: u64,
    ) -> io::Result<EngineOutput>;
}

/// Runs the `ffmpeg` binary as a child process.
#[derive(Debug, Clone)]
pub struct FfmpegEngine {
    program: PathBuf,
}

impl FfmpegEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, args: Vec<OsString>) -> io::Result<EngineOutput> {
        debug!(program = %self.program.display(), ?args, "spawning media engine");
        let output = TokioCommand::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        Ok(EngineOutput {
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

impl Default for FfmpegEngine {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

#[async_trait]
impl MediaEngine for FfmpegEngine {
    async fn split(
        &self,
        input: &Path,
        pattern: &Path,
        chunk_seconds: u64,
    ) -> io::Result<EngineOutput> {
        self.run(split_args(input, pattern, chunk_seconds)).await
    }

    async fn transcode_chunk(
        &self,
        input: &Path,
        output: &Path,
        params: &TranscodeParams,
    ) -> io::Result<EngineOutput> {
        self.run(transcode_args(input, output, params, true)).await
    }

    async fn transcode_file(
        &self,
        input: &Path,
        output: &Path,
        params: &TranscodeParams,
    ) -> io::Result<EngineOutput> {
        self.run(transcode_args(input, output, params, false)).await
    }

    async fn concat(&self, manifest: &Path, output: &Path) -> io::Result<EngineOutput> {
        self.run(concat_args(manifest, output)).await
    }

    async fn package_hls(
        &self,
        input: &Path,
        playlist: &Path,
        segment_pattern: &Path,
        segment_seconds: u64,
    ) -> io::Result<EngineOutput> {
        self.run(hls_args(input, playlist, segment_pattern, segment_seconds))
            .await
    }
}

fn args<const N: usize>(items: [&dyn AsRef<std::ffi::OsStr>; N]) -> Vec<OsString> {
    items.iter().map(|a| a.as_ref().to_os_string()).collect()
}

pub(crate) fn split_args(input: &Path, pattern: &Path, chunk_seconds: u64) -> Vec<OsString> {
    let seconds = chunk_seconds.to_string();
    args([
        &"-y",
        &"-i",
        &input,
        &"-c",
        &"copy",
        &"-f",
        &"segment",
        &"-segment_time",
        &seconds,
        &"-reset_timestamps",
        &"1",
        &pattern,
    ])
}

pub(crate) fn transcode_args(
    input: &Path,
    output: &Path,
    params: &TranscodeParams,
    mpegts: bool,
) -> Vec<OsString> {
    let scale = params.scale_filter();
    let mut out = args([
        &"-y",
        &"-analyzeduration",
        &"10M",
        &"-probesize",
        &"20M",
        &"-i",
        &input,
        &"-vf",
        &scale,
        &"-c:v",
        &params.video_codec,
    ]);
    if mpegts {
        out.extend(args([&"-c:a", &"aac", &"-f", &"mpegts"]));
    }
    out.push(output.as_os_str().to_os_string());
    out
}

pub(crate) fn concat_args(manifest: &Path, output: &Path) -> Vec<OsString> {
    args([
        &"-y", &"-f", &"concat", &"-safe", &"0", &"-i", &manifest, &"-c", &"copy", &output,
    ])
}

pub(crate) fn hls_args(
    input: &Path,
    playlist: &Path,
    segment_pattern: &Path,
    segment_seconds: u64,
) -> Vec<OsString> {
    let seconds = segment_seconds.to_string();
    args([
        &"-y",
        &"-i",
        &input,
        &"-c:v",
        &"copy",
        &"-c:a",
        &"copy",
        &"-f",
        &"hls",
        &"-hls_time",
        &seconds,
        &"-hls_list_size",
        &"0",
        &"-hls_playlist_type",
        &"vod",
        &"-hls_segment_filename",
        &segment_pattern,
        &playlist,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_split_is_stream_copy() {
        let args = strings(split_args(
            Path::new("/tmp/in.mp4"),
            Path::new("/tmp/segment%05d.ts"),
            120,
        ));
        assert_eq!(
            args,
            vec![
                "-y", "-i", "/tmp/in.mp4", "-c", "copy", "-f", "segment",
                "-segment_time", "120", "-reset_timestamps", "1", "/tmp/segment%05d.ts"
            ]
        );
        // Mapping every stream would pull timecode and data tracks from MOV
        // sources into the MPEG-TS muxer, which rejects them.
        assert!(!args.iter().any(|a| a == "-map"));
    }

    #[test]
    fn test_transcode_chunk_forces_mpegts() {
        let params = TranscodeParams::default();
        let args = strings(transcode_args(
            Path::new("in.ts"),
            Path::new("out.ts"),
            &params,
            true,
        ));
        let joined = args.join(" ");
        assert!(joined.contains("-vf scale=1280:720"));
        assert!(joined.contains("-c:v libx264"));
        assert!(joined.contains("-c:a aac -f mpegts"));
        assert_eq!(args.last().unwrap(), "out.ts");
    }

    #[test]
    fn test_transcode_file_keeps_container() {
        let params = TranscodeParams::default();
        let args = strings(transcode_args(
            Path::new("in.mov"),
            Path::new("out.mp4"),
            &params,
            false,
        ));
        assert!(!args.contains(&"mpegts".to_string()));
        assert_eq!(args.last().unwrap(), "out.mp4");
    }

    #[test]
    fn test_concat_and_hls_args() {
        let concat = strings(concat_args(Path::new("list.txt"), Path::new("out.mp4")));
        assert_eq!(
            concat,
            vec!["-y", "-f", "concat", "-safe", "0", "-i", "list.txt", "-c", "copy", "out.mp4"]
        );

        let hls = strings(hls_args(
            Path::new("out.mp4"),
            Path::new("hls_clip.m3u8"),
            Path::new("hls_clip_%05d.ts"),
            10,
        ));
        let joined = hls.join(" ");
        assert!(joined.contains("-f hls -hls_time 10 -hls_list_size 0"));
        assert!(joined.contains("-hls_segment_filename hls_clip_%05d.ts"));
        assert_eq!(hls.last().unwrap(), "hls_clip.m3u8");
    }

    #[test]
    fn test_stderr_tail() {
        let stderr: Vec<String> = (0..20).map(|i| format!("line {}", i)).collect();
        let output = EngineOutput::failed(1, stderr.join("\n"));
        assert!(!output.success());
        let tail = output.stderr_tail();
        assert!(tail.starts_with("line 10"));
        assert!(tail.ends_with("line 19"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_io_error() {
        let engine = FfmpegEngine::new("/nonexistent/ffmpeg-binary");
        let result = engine
            .concat(Path::new("list.txt"), Path::new("out.mp4"))
            .await;
        assert!(result.is_err());
    }
}
