//! Staggered cache-invalidation cascade.
//!
//! Coordinates eviction across independent cache backends without blocking
//! the triggering request:
//!
//! - **Writer**: buffers one candidate cascade per request and persists it once
//!   at end-of-request, replacing any cascade already in flight.
//! - **Processor**: driven by a periodic tick, flushes at most one due item and
//!   restarts the stagger clock for the rest.
//!
//! Backend failures, corrupt rows and unknown slugs are logged and dropped;
//! nothing here returns an error to the hosting request.

mod clock;
mod config;
mod events;
mod invalidator;
mod item;
mod lock;
mod queue;
mod store;
mod trigger;

pub use clock::{Clock, FlagGate, ManualClock, SystemClock};
pub use config::{CascadeConfig, OperatingMode};
pub use events::{
    CascadeEvent, CascadeEvents, METRIC_COMPLETE, METRIC_FLUSH_MS, METRIC_ITEMS_PROCESSED,
    METRIC_QUEUE_LEN, METRIC_WRITES_SKIPPED,
};
pub use invalidator::{Invalidator, InvalidatorError, InvalidatorRegistry};
pub use item::{QueueItem, decode_queue, encode_queue};
pub use queue::{
    CacheQueue, DEFAULT_QUEUE_KEY, ItemResult, TickOutcome, WriteOutcome, request_scope,
};
pub use store::{FileQueueStore, MemoryQueueStore, QueueStore, StoreError};
pub use trigger::{CacheSignal, CacheTrigger};

pub use lock::METRIC_LOCK_POISONED;
pub(crate) use lock::{mutex_lock, rw_read, rw_write};
