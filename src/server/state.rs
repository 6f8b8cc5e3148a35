//! Application state shared across all request handlers.

use std::sync::Arc;

use crate::memory::engine::MemoryEngine;

/// Shared application state.
pub struct AppState {
    /// Memory engine serving every route.
    pub engine: MemoryEngine,
}

impl AppState {
    /// Wrap an already built engine.
    #[must_use]
    pub fn new(engine: MemoryEngine) -> Arc<Self> {
        Arc::new(Self { engine })
    }
}
