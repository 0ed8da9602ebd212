//! Local Worker Binary - single host, no cloud services
//!
//! Blobs live under STORAGE_DIR and jobs in memory. Every command-line
//! argument is a blob key (relative to STORAGE_DIR) submitted as a job
//! before polling starts.
//!
//! Example: `local_worker videos/u1_clip.mp4`

use jetstream::adapters::local::{FsAdapter, MemoryJobRepository};
use jetstream::application::{JobProducer, JobRunner, LeaseCoordinator, Poller};
use jetstream::config::{LocalConfig, WorkerConfig};
use jetstream::domain::av::FfmpegEngine;
use jetstream::telemetry;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    telemetry::init();

    let local = LocalConfig::from_env();
    let config = match WorkerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };

    let storage = FsAdapter::new(local.storage_dir.clone());
    let repo = MemoryJobRepository::new();

    let producer = JobProducer::new(repo.clone(), config.default_params.clone());
    for key in std::env::args().skip(1) {
        if let Err(e) = producer.submit(&key).await {
            error!(error = %e, key, "Failed to submit job");
        }
    }

    info!(storage_dir = %local.storage_dir.display(), "Local worker ready");

    let lease = LeaseCoordinator::new(repo, config.worker_id.clone(), config.lease_ttl);
    let engine = FfmpegEngine::new(config.ffmpeg_bin.clone());
    let poller = Poller::new(JobRunner::new(storage, lease, engine, config));

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    poller.run(shutdown).await;
}
