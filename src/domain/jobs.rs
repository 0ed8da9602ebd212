use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque, immutable identifier of a job record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "PROCESSING" => Ok(JobStatus::Processing),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

/// Which pipeline variant produced a job's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Mode {
    Single,
    #[default]
    Parallel,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Single => "Single",
            Mode::Parallel => "Parallel",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "single" => Ok(Mode::Single),
            "parallel" => Ok(Mode::Parallel),
            other => Err(format!("unknown pipeline mode: {}", other)),
        }
    }
}

/// Output container, scale and codec requested for a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscodeParams {
    pub output_format: String,
    pub resolution: String,
    pub video_codec: String,
}

impl TranscodeParams {
    /// Argument for ffmpeg's `-vf`. Accepts both `1280x720` and `1280:720`.
    pub fn scale_filter(&self) -> String {
        format!("scale={}", self.resolution.replacen('x', ":", 1))
    }
}

impl Default for TranscodeParams {
    fn default() -> Self {
        Self {
            output_format: "mp4".to_string(),
            resolution: "1280x720".to_string(),
            video_codec: "libx264".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub input_key: String,
    pub name: String,
    pub params: TranscodeParams,
    pub status: JobStatus,
    pub output_key: Option<String>,
    pub hls_output_key: Option<String>,
    pub duration_seconds: Option<f64>,
    pub mode: Option<Mode>,
    pub created_at: DateTime<Utc>,
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
}

impl Job {
    /// A fresh PENDING record for `input_key`.
    pub fn pending(input_key: &str, params: TranscodeParams) -> Self {
        Self {
            id: JobId::new(),
            input_key: input_key.to_string(),
            name: display_name(input_key),
            params,
            status: JobStatus::Pending,
            output_key: None,
            hls_output_key: None,
            duration_seconds: None,
            mode: None,
            created_at: Utc::now(),
            lease_owner: None,
            lease_expires_at: None,
        }
    }

    /// Display name without its extension, used to name every output.
    pub fn stem(&self) -> String {
        Path::new(&self.name)
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or(self.id.as_str())
            .to_string()
    }

    /// Key of the final container; its presence marks the job as done.
    pub fn final_output_key(&self, output_prefix: &str) -> String {
        format!(
            "{}{}_transcoded.{}",
            output_prefix,
            self.stem(),
            self.params.output_format
        )
    }

    /// Prefix holding every intermediate blob of this job.
    pub fn segments_prefix(&self, output_prefix: &str) -> String {
        format!("{}segments/{}/", output_prefix, self.id)
    }

    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Processing
            && self.lease_expires_at.map(|at| at < now).unwrap_or(false)
    }

    /// Apply a partial update in place. Unset fields are left untouched.
    pub fn apply(&mut self, update: &JobUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(key) = &update.output_key {
            self.output_key = Some(key.clone());
        }
        if let Some(key) = &update.hls_output_key {
            self.hls_output_key = Some(key.clone());
        }
        if let Some(duration) = update.duration_seconds {
            self.duration_seconds = Some(duration);
        }
        if let Some(mode) = update.mode {
            self.mode = Some(mode);
        }
        if let Some(owner) = &update.lease_owner {
            self.lease_owner = Some(owner.clone());
        }
        if let Some(at) = update.lease_expires_at {
            self.lease_expires_at = Some(at);
        }
    }

    pub fn satisfies(&self, precondition: &Precondition) -> bool {
        match precondition {
            Precondition::StatusIs(status) => self.status == *status,
            Precondition::LeaseExpired { now } => self.lease_expired(*now),
            Precondition::LeaseHeldBy(owner) => {
                self.status == JobStatus::Processing
                    && self.lease_owner.as_deref() == Some(owner.as_str())
            }
        }
    }
}

/// Display label of an uploaded file: its name after the first `_`.
pub fn display_name(input_key: &str) -> String {
    let file_name = input_key.rsplit('/').next().unwrap_or(input_key);
    match file_name.split_once('_') {
        Some((_, rest)) if !rest.is_empty() => rest.to_string(),
        _ => file_name.to_string(),
    }
}

/// The mutable fields of a job record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub output_key: Option<String>,
    pub hls_output_key: Option<String>,
    pub duration_seconds: Option<f64>,
    pub mode: Option<Mode>,
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    pub fn with_hls_output_key(mut self, key: impl Into<String>) -> Self {
        self.hls_output_key = Some(key.into());
        self
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration_seconds = Some(seconds.max(0.0));
        self
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_lease(mut self, owner: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        self.lease_owner = Some(owner.into());
        self.lease_expires_at = expires_at;
        self
    }
}

/// Condition a compare-and-swap update must find on the stored record.
#[derive(Debug, Clone, PartialEq)]
pub enum Precondition {
    StatusIs(JobStatus),
    /// PROCESSING with a lease deadline before `now`.
    LeaseExpired { now: DateTime<Utc> },
    /// PROCESSING and leased to this owner.
    LeaseHeldBy(String),
}
