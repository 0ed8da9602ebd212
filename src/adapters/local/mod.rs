//! Local adapters for single-host deployment and tests.

pub mod fs;
pub mod memory;

pub use fs::FsAdapter;
pub use memory::{MemoryJobRepository, MemoryStorage};
