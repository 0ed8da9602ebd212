//! Registers an uploaded video as a PENDING job.
//!
//! Environment Variables:
//! - VIDEO_KEY: blob key of the uploaded source (e.g. videos/u1_clip.mp4)
//! - DYNAMODB_TABLE, S3_BUCKET: see `AwsConfig`

use jetstream::adapters::aws::DynamoAdapter;
use jetstream::application::JobProducer;
use jetstream::config::{AwsConfig, WorkerConfig};
use jetstream::telemetry;
use tracing::error;

#[tokio::main]
async fn main() {
    telemetry::init();

    let Ok(video_key) = std::env::var("VIDEO_KEY") else {
        error!("VIDEO_KEY env var required");
        std::process::exit(1);
    };
    let (aws, config) = match (AwsConfig::from_env(), WorkerConfig::from_env()) {
        (Ok(aws), Ok(config)) => (aws, config),
        (Err(e), _) | (_, Err(e)) => {
            error!(error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };

    let sdk_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let repo = DynamoAdapter::new(
        aws_sdk_dynamodb::Client::new(&sdk_config),
        aws.dynamodb_table,
        config.default_params.clone(),
    );

    let producer = JobProducer::new(repo, config.default_params);
    match producer.submit(&video_key).await {
        Ok(job) => match serde_json::to_string_pretty(&job) {
            Ok(json) => println!("{}", json),
            Err(e) => error!(error = %e, "Could not render job"),
        },
        Err(e) => {
            error!(error = %e, video_key, "Failed to submit job");
            std::process::exit(1);
        }
    }
}
