//! Configuration for the worker and its deployment environments.

use crate::domain::jobs::{Mode, TranscodeParams};
use crate::error::ConfigError;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const GIB: u64 = 1024 * 1024 * 1024;

/// Tunables shared by every deployment.
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// Identifies this process in lease records
    pub worker_id: String,
    /// Prefix for final outputs and per-job intermediates
    pub output_prefix: String,
    /// Parent of the per-job scratch directories
    pub scratch_dir: PathBuf,
    /// Target chunk duration for the segmenter
    pub chunk_seconds: u64,
    /// Target segment duration of the packaged playlist
    pub hls_segment_seconds: u64,
    /// Minimum free scratch space before a job starts; 0 disables the check
    pub min_scratch_bytes: u64,
    /// Upper bound on concurrently transcoded chunks
    pub max_parallel_transcodes: usize,
    /// Sleep between polling passes
    pub poll_interval: Duration,
    /// Random extra sleep added to every poll interval
    pub poll_jitter: Duration,
    /// Lease lifetime; `None` keeps claims forever
    pub lease_ttl: Option<Duration>,
    /// Pipeline variant used for every job
    pub mode: Mode,
    /// Media engine executable
    pub ffmpeg_bin: PathBuf,
    /// Parameters for records that do not carry their own
    pub default_params: TranscodeParams,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: default_worker_id(),
            output_prefix: "transcoded/".to_string(),
            scratch_dir: env::temp_dir(),
            chunk_seconds: 120,
            hls_segment_seconds: 10,
            min_scratch_bytes: GIB,
            max_parallel_transcodes: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            poll_interval: Duration::from_secs(10),
            poll_jitter: Duration::ZERO,
            lease_ttl: None,
            mode: Mode::Parallel,
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            default_params: TranscodeParams::default(),
        }
    }
}

impl WorkerConfig {
    /// Load configuration from environment variables.
    ///
    /// Unset variables keep their defaults; set but unparsable ones are errors.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        let defaults = Self::default();

        let lease_ttl = parse_var::<u64>("LEASE_TTL_SECS")?
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        Ok(Self {
            worker_id: env::var("WORKER_ID").unwrap_or(defaults.worker_id),
            output_prefix: env::var("OUTPUT_PREFIX").unwrap_or(defaults.output_prefix),
            scratch_dir: env::var("SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.scratch_dir),
            chunk_seconds: positive("CHUNK_SECONDS", defaults.chunk_seconds)?,
            hls_segment_seconds: positive("HLS_SEGMENT_SECONDS", defaults.hls_segment_seconds)?,
            min_scratch_bytes: parse_var("MIN_SCRATCH_BYTES")?
                .unwrap_or(defaults.min_scratch_bytes),
            max_parallel_transcodes: positive(
                "MAX_PARALLEL_TRANSCODES",
                defaults.max_parallel_transcodes,
            )?,
            poll_interval: parse_var("POLL_INTERVAL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.poll_interval),
            poll_jitter: parse_var("POLL_JITTER_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_jitter),
            lease_ttl,
            mode: parse_var("PIPELINE_MODE")?.unwrap_or(defaults.mode),
            ffmpeg_bin: env::var("FFMPEG_BIN")
                .map(PathBuf::from)
                .unwrap_or(defaults.ffmpeg_bin),
            default_params: TranscodeParams {
                output_format: env::var("DEFAULT_OUTPUT_FORMAT")
                    .unwrap_or(defaults.default_params.output_format),
                resolution: env::var("DEFAULT_RESOLUTION")
                    .unwrap_or(defaults.default_params.resolution),
                video_codec: env::var("DEFAULT_VIDEO_CODEC")
                    .unwrap_or(defaults.default_params.video_codec),
            },
        })
    }
}

/// Configuration for AWS deployment.
#[derive(Clone, Debug)]
pub struct AwsConfig {
    /// S3 bucket for inputs and outputs
    pub s3_bucket: String,
    /// DynamoDB table holding job records
    pub dynamodb_table: String,
}

impl AwsConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Ok(Self {
            s3_bucket: env::var("S3_BUCKET").map_err(|_| ConfigError::Missing("S3_BUCKET"))?,
            dynamodb_table: env::var("DYNAMODB_TABLE")
                .map_err(|_| ConfigError::Missing("DYNAMODB_TABLE"))?,
        })
    }
}

/// Configuration for a single host without cloud services.
#[derive(Clone, Debug)]
pub struct LocalConfig {
    /// Directory serving as the blob store
    pub storage_dir: PathBuf,
}

impl LocalConfig {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Self {
            storage_dir: env::var("STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./storage")),
        }
    }
}

fn default_worker_id() -> String {
    let short = uuid::Uuid::new_v4().simple().to_string();
    format!("worker-{}-{}", std::process::id(), &short[..8])
}

fn parse_var<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
        Err(_) => Ok(None),
    }
}

fn positive<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default + ToString,
{
    match parse_var::<T>(name)? {
        Some(value) if value <= T::default() => Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
        }),
        Some(value) => Ok(value),
        None => Ok(default),
    }
}
