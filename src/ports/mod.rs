//! Ports - Trait definitions implemented by adapters.

pub mod repository;
pub mod storage;
