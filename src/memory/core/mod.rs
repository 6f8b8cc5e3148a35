//! Core memory types, configuration and errors.

pub mod config;
pub mod errors;
pub mod record;

pub use config::{MemoryConfig, SearchConfig, SearchParams, StorageConfig, VectorConfig};
pub use errors::{MemoryError, MemoryResult};
pub use record::{AddEvent, AddEvents, MemoryRecord, RecordTimestamps, parse_timestamp};
