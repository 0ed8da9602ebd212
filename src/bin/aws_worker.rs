//! AWS Worker Binary
//!
//! Long-running worker that polls the DynamoDB job table, claims PENDING
//! jobs and transcodes them through S3.
//!
//! Environment Variables:
//! - AWS_REGION: AWS region (e.g., us-east-1)
//! - S3_BUCKET: S3 bucket holding inputs and outputs
//! - DYNAMODB_TABLE: DynamoDB table holding job records
//! - Tunables read by `WorkerConfig::from_env`

use jetstream::adapters::aws::{DynamoAdapter, S3Adapter};
use jetstream::application::{JobRunner, LeaseCoordinator, Poller};
use jetstream::config::{AwsConfig, WorkerConfig};
use jetstream::domain::av::FfmpegEngine;
use jetstream::telemetry;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    telemetry::init();

    let (aws, config) = match (AwsConfig::from_env(), WorkerConfig::from_env()) {
        (Ok(aws), Ok(config)) => (aws, config),
        (Err(e), _) | (_, Err(e)) => {
            error!(error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };

    let sdk_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let storage = S3Adapter::new(aws_sdk_s3::Client::new(&sdk_config), aws.s3_bucket);
    let repo = DynamoAdapter::new(
        aws_sdk_dynamodb::Client::new(&sdk_config),
        aws.dynamodb_table,
        config.default_params.clone(),
    );

    let lease = LeaseCoordinator::new(repo, config.worker_id.clone(), config.lease_ttl);
    let engine = FfmpegEngine::new(config.ffmpeg_bin.clone());
    let poller = Poller::new(JobRunner::new(storage, lease, engine, config));

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested, finishing current job");
            trigger.cancel();
        }
    });

    poller.run(shutdown).await;
}
