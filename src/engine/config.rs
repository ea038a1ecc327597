//! Engine configuration options.

use serde::{Deserialize, Serialize};

/// Operational settings. risk parameters live in [`crate::config`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of events to retain in memory.
    pub max_events: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { max_events: 100_000 }
    }
}
