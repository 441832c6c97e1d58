//! Engine configuration.
//!
//! Controls the queue key, the initial flag gate, routing mode and per-backend
//! availability overrides via the `[cascade]` table:
//!
//! ```toml
//! [cascade]
//! queue_key = "cascade_queue"
//! should_flag = true
//! mode = "auto"
//!
//! [cascade.availability]
//! cloudflare = false
//! ```

use std::collections::HashMap;

use serde::Deserialize;

use super::queue::DEFAULT_QUEUE_KEY;

/// How signals are routed to invalidators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    /// Delegated when the page cache is available, standalone otherwise.
    #[default]
    Auto,
    /// The page cache owns day-to-day content changes.
    Delegated,
    /// The object cache and CDNs handle every content signal.
    Standalone,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CascadeConfig {
    /// Durable store key holding the queue.
    pub queue_key: String,
    /// Initial state of the process-wide flag gate.
    pub should_flag: bool,
    /// Signal routing mode.
    pub mode: OperatingMode,
    /// Per-slug availability overrides.
    pub availability: HashMap<String, bool>,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            queue_key: DEFAULT_QUEUE_KEY.to_string(),
            should_flag: true,
            mode: OperatingMode::Auto,
            availability: HashMap::new(),
        }
    }
}

impl CascadeConfig {
    /// Returns the queue key, falling back to the default when blank.
    pub fn queue_key(&self) -> &str {
        let trimmed = self.queue_key.trim();
        if trimmed.is_empty() {
            DEFAULT_QUEUE_KEY
        } else {
            trimmed
        }
    }
}
