//! AWS adapters: S3 for blobs, DynamoDB for the job table.

pub mod dynamodb;
pub mod s3;

pub use dynamodb::DynamoAdapter;
pub use s3::S3Adapter;
