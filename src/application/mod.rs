//! Application layer - generic services over the ports.

pub mod dispatcher;
pub mod lease;
pub mod merger;
pub mod poller;
pub mod producer;
pub mod runner;
pub mod segmenter;

pub use lease::{ClaimOutcome, LeaseCoordinator};
pub use poller::Poller;
pub use producer::JobProducer;
pub use runner::{JobRunner, RunOutcome};
