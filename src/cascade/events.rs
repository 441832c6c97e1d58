//! Signals emitted by the engine.
//!
//! Collaborators subscribe through [`CacheQueue::subscribe`](super::CacheQueue::subscribe)
//! to observe per-item flushes and cascade completion.

use tokio::sync::broadcast;

pub const METRIC_ITEMS_PROCESSED: &str = "cascade_items_processed_total";
pub const METRIC_FLUSH_MS: &str = "cascade_flush_ms";
pub const METRIC_QUEUE_LEN: &str = "cascade_queue_len";
pub const METRIC_COMPLETE: &str = "cascade_complete_total";
pub const METRIC_WRITES_SKIPPED: &str = "cascade_writes_skipped_total";

const CHANNEL_CAPACITY: usize = 64;

/// Observable cascade milestones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CascadeEvent {
    /// An invalidator flushed successfully.
    ItemFlushed { slug: String },
    /// The persisted queue went from non-empty to empty.
    Complete,
}

/// Fan-out for [`CascadeEvent`]s. Sending with no subscribers is not an error.
#[derive(Debug, Clone)]
pub struct CascadeEvents {
    sender: broadcast::Sender<CascadeEvent>,
}

impl CascadeEvents {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CascadeEvent> {
        self.sender.subscribe()
    }

    pub(crate) fn emit(&self, event: CascadeEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for CascadeEvents {
    fn default() -> Self {
        Self::new()
    }
}
