//! Memory engine orchestration module.

pub mod core;

pub use core::{MemoryBackends, MemoryEngine, MemoryListing, RebuildReport};
