//! Audio/Video domain modules.

pub mod cmd;
pub mod scratch;

pub use cmd::{EngineOutput, FfmpegEngine, MediaEngine};
