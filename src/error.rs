//! Error types.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;
pub type RepositoryResult<T> = Result<T, RepositoryError>;
pub type JobResult<T> = Result<T, JobError>;

/// Blob store failures.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound(key.into())
    }

    pub fn backend(msg: impl ToString) -> Self {
        Self::Backend(msg.to_string())
    }
}

/// Job store failures.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Malformed job record {id}: {reason}")]
    Malformed { id: String, reason: String },

    #[error("Job store backend error: {0}")]
    Backend(String),
}

impl RepositoryError {
    pub fn backend(msg: impl ToString) -> Self {
        Self::Backend(msg.to_string())
    }

    pub fn malformed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} env var required")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// External invocation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolStage {
    Split,
    Transcode,
    Concat,
    Package,
}

impl fmt::Display for ToolStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ToolStage::Split => "split",
            ToolStage::Transcode => "transcode",
            ToolStage::Concat => "concat",
            ToolStage::Package => "package",
        })
    }
}

/// Coarse classification used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Resource,
    Segmentation,
    ToolExecution,
    Merge,
    Storage,
    Unexpected,
}

/// Anything that makes a claimed job fail.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Input {0} does not exist")]
    InputNotFound(String),

    #[error("Insufficient scratch space in {}: {available} bytes free, {required} required", path.display())]
    InsufficientScratch {
        path: PathBuf,
        available: u64,
        required: u64,
    },

    #[error("Media engine {stage} step exited with {}: {stderr}", code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()))]
    Tool {
        stage: ToolStage,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Segmentation produced no chunks")]
    NoSegments,

    #[error("Merge manifest is empty")]
    EmptyManifest,

    #[error("Packaged playlist lists no segments")]
    EmptyPlaylist,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Job store error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl JobError {
    pub fn tool(stage: ToolStage, output: &crate::domain::av::EngineOutput) -> Self {
        Self::Tool {
            stage,
            code: output.code,
            stderr: output.stderr_tail(),
        }
    }

    pub fn unexpected(msg: impl Into<String>) -> Self {
        Self::Unexpected(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            JobError::InputNotFound(_) => ErrorKind::NotFound,
            JobError::InsufficientScratch { .. } => ErrorKind::Resource,
            JobError::Tool {
                stage: ToolStage::Split,
                ..
            }
            | JobError::NoSegments => ErrorKind::Segmentation,
            JobError::Tool {
                stage: ToolStage::Transcode,
                ..
            } => ErrorKind::ToolExecution,
            JobError::Tool {
                stage: ToolStage::Concat | ToolStage::Package,
                ..
            }
            | JobError::EmptyManifest
            | JobError::EmptyPlaylist => ErrorKind::Merge,
            JobError::Storage(StorageError::NotFound(_)) => ErrorKind::NotFound,
            JobError::Storage(_) | JobError::Repository(_) => ErrorKind::Storage,
            JobError::Io(_) | JobError::Unexpected(_) => ErrorKind::Unexpected,
        }
    }
}
