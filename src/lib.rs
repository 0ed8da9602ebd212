//! Jetstream - distributed video transcoding workers
//!
//! Hexagonal Architecture:
//! - domain/: Pure business logic (jobs, segments, media engine, hls)
//! - ports/: Trait definitions for the blob store and job store
//! - adapters/: Concrete implementations
//! - application/: Generic services (lease, pipeline stages, runner, poller)
//! - config: Environment configuration
//!
//! # Features
//! - `local`: Directory-backed blob store and in-memory job store
//! - `aws`: S3 blob store and DynamoDB job store

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod ports;
pub mod telemetry;

pub use config::{AwsConfig, LocalConfig, WorkerConfig};
pub use error::{JobError, RepositoryError, StorageError};
