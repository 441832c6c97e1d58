//! The invalidation engine.
//!
//! Two independent sides share one durable key:
//!
//! - **Writer**: [`CacheQueue::write`] filters, sorts and timestamps candidate
//!   invalidators into a per-request buffer; [`CacheQueue::finish_request`]
//!   persists it once at end-of-request, replacing any in-flight cascade.
//! - **Processor**: [`CacheQueue::process`] runs once per tick, flushes the head
//!   item when due and restarts the clock for everything behind it.
//!
//! Request-scoped state (write buffer, flush registration, sync-flush guard,
//! processing flag) lives in a task-local slot entered with [`request_scope`].
//! Concurrent requests sharing one engine never see each other's buffer, and
//! the processing flag only suppresses writes raised by the flush's own task.
//! Outside any scope the engine falls back to a single engine-wide slot.

use std::cell::RefCell;
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use tracing::{debug, error, info, warn};

use super::clock::{Clock, FlagGate, SystemClock};
use super::events::{
    CascadeEvent, CascadeEvents, METRIC_COMPLETE, METRIC_FLUSH_MS, METRIC_ITEMS_PROCESSED,
    METRIC_QUEUE_LEN, METRIC_WRITES_SKIPPED,
};
use super::invalidator::{Invalidator, InvalidatorRegistry};
use super::item::{QueueItem, decode_queue, encode_queue};
use super::lock::mutex_lock;
use super::store::{QueueStore, StoreError};

const SOURCE: &str = "cascade::queue";

/// Store key used when none is configured.
pub const DEFAULT_QUEUE_KEY: &str = "cascade_queue";

/// Result of a [`CacheQueue::write`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The buffer now holds these slugs, in cascade order.
    Buffered(Vec<String>),
    /// No candidate was available; existing state is untouched.
    NoneAvailable,
    /// The flag gate was closed.
    GateClosed,
    /// A flush was executing.
    Suppressed,
}

/// What happened to the head item during a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemResult {
    Flushed,
    Failed(String),
    UnknownSlug,
}

/// Result of a [`CacheQueue::process`] tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing persisted.
    Idle,
    /// The head item is not due yet.
    NotDue { slug: String, due_in: i64 },
    /// The head item was popped.
    Processed {
        slug: String,
        result: ItemResult,
        remaining: usize,
        persisted: bool,
    },
    /// The store could not be read.
    StoreUnavailable,
}

impl TickOutcome {
    /// True when this tick popped the last item and cleared the store.
    pub fn drained(&self) -> bool {
        matches!(
            self,
            Self::Processed {
                remaining: 0,
                persisted: true,
                ..
            }
        )
    }
}

#[derive(Debug, Default)]
struct RequestState {
    pending: Option<Vec<QueueItem>>,
    flush_registered: bool,
    sync_flushed: HashSet<String>,
    processing: bool,
}

tokio::task_local! {
    static REQUEST: RefCell<RequestState>;
}

/// Run `future` as one unit of work with its own write buffer.
///
/// Every engine touched inside the future shares this scope. Call
/// [`CacheQueue::finish_request`] before the future completes; whatever is
/// still buffered when the scope ends is discarded.
pub async fn request_scope<F: Future>(future: F) -> F::Output {
    REQUEST
        .scope(RefCell::new(RequestState::default()), future)
        .await
}

fn in_request_scope() -> bool {
    REQUEST.try_with(|_| ()).is_ok()
}

/// Marks the current scope as processing; cleared on drop, including unwind.
struct ProcessingGuard;

impl ProcessingGuard {
    fn enter() -> Self {
        set_processing(true);
        Self
    }
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        set_processing(false);
    }
}

fn set_processing(value: bool) {
    let _ = REQUEST.try_with(|state| state.borrow_mut().processing = value);
}

/// Staggered cache-invalidation queue.
///
/// Safe to share across concurrent requests as long as each one runs inside
/// [`request_scope`] and ends with [`finish_request`](Self::finish_request).
pub struct CacheQueue {
    key: String,
    store: Arc<dyn QueueStore>,
    registry: Arc<InvalidatorRegistry>,
    clock: Arc<dyn Clock>,
    gate: FlagGate,
    events: CascadeEvents,
    unscoped: Mutex<RequestState>,
}

impl CacheQueue {
    pub fn new(store: Arc<dyn QueueStore>, registry: Arc<InvalidatorRegistry>) -> Self {
        Self {
            key: DEFAULT_QUEUE_KEY.to_string(),
            store,
            registry,
            clock: Arc::new(SystemClock),
            gate: FlagGate::default(),
            events: CascadeEvents::new(),
            unscoped: Mutex::new(RequestState::default()),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_gate(mut self, gate: FlagGate) -> Self {
        self.gate = gate;
        self
    }

    /// Share an event channel with other engines in the process.
    pub fn with_events(mut self, events: CascadeEvents) -> Self {
        self.events = events;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn registry(&self) -> &Arc<InvalidatorRegistry> {
        &self.registry
    }

    pub fn gate(&self) -> &FlagGate {
        &self.gate
    }

    /// True while a queued flush runs in the current request scope.
    pub fn is_processing(&self) -> bool {
        self.with_request("is_processing", |request| request.processing)
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<CascadeEvent> {
        self.events.subscribe()
    }

    /// Buffer a cascade for `candidates`.
    ///
    /// The buffer is replaced on every call; only the last write before
    /// [`finish_request`](Self::finish_request) is persisted.
    pub fn write(&self, candidates: &[Arc<dyn Invalidator>]) -> WriteOutcome {
        let mut available: Vec<&Arc<dyn Invalidator>> = candidates
            .iter()
            .filter(|invalidator| self.registry.is_available(invalidator.as_ref()))
            .collect();

        if available.is_empty() {
            debug!(
                candidates = candidates.len(),
                "Queue write skipped: no available invalidators"
            );
            counter!(METRIC_WRITES_SKIPPED, "reason" => "unavailable").increment(1);
            return WriteOutcome::NoneAvailable;
        }

        if !self.gate.should_flag() {
            debug!("Queue write suppressed: flag gate closed");
            counter!(METRIC_WRITES_SKIPPED, "reason" => "gate_closed").increment(1);
            return WriteOutcome::GateClosed;
        }

        if self.is_processing() {
            debug!("Queue write suppressed during processing");
            counter!(METRIC_WRITES_SKIPPED, "reason" => "processing").increment(1);
            return WriteOutcome::Suppressed;
        }

        available.sort_by_key(|invalidator| invalidator.priority());

        let now = self.clock.now();
        let items: Vec<QueueItem> = available
            .iter()
            .map(|invalidator| QueueItem::from_invalidator(invalidator.as_ref(), now))
            .collect();
        let slugs: Vec<String> = items.iter().map(|item| item.slug.clone()).collect();

        self.with_request("write", |request| {
            if request.pending.is_some() {
                debug!(slugs = ?slugs, "Replacing buffered queue write");
            }
            request.pending = Some(items);
            if !request.flush_registered {
                request.flush_registered = true;
                debug!("End-of-request queue flush registered");
            }
        });

        WriteOutcome::Buffered(slugs)
    }

    /// Persist the buffered cascade, overwriting whatever is stored.
    ///
    /// Returns true when a queue was written.
    pub async fn flush_write_buffer(&self) -> bool {
        let Some(items) =
            self.with_request("flush_write_buffer", |request| request.pending.take())
        else {
            return false;
        };

        let slugs: Vec<&str> = items.iter().map(|item| item.slug.as_str()).collect();
        match self.store.save(&self.key, encode_queue(&items)).await {
            Ok(()) => {
                info!(key = %self.key, slugs = ?slugs, "Queue written");
                gauge!(METRIC_QUEUE_LEN).set(items.len() as f64);
                true
            }
            Err(err) => {
                error!(key = %self.key, slugs = ?slugs, error = %err, "Queue write failed");
                false
            }
        }
    }

    /// End-of-request hook.
    ///
    /// Flushes the write buffer if a write registered a flush during this
    /// request, then resets request-scoped state. Safe to call repeatedly.
    pub async fn finish_request(&self) -> bool {
        let registered = self.with_request("finish_request", |request| {
            request.sync_flushed.clear();
            std::mem::take(&mut request.flush_registered)
        });

        if registered {
            self.flush_write_buffer().await
        } else {
            false
        }
    }

    /// Flush `invalidator` immediately, bypassing the queue.
    ///
    /// Runs at most once per slug per request no matter how often the
    /// originating signal fires. Returns true when the flush ran and succeeded.
    pub async fn flush_now(&self, invalidator: &dyn Invalidator) -> bool {
        let slug = invalidator.slug().to_string();
        if !self.registry.is_available(invalidator) {
            debug!(slug = %slug, "Synchronous flush skipped: unavailable");
            return false;
        }

        let first = self.with_request("flush_now", |request| {
            request.sync_flushed.insert(slug.clone())
        });
        if !first {
            debug!(slug = %slug, "Synchronous flush already ran this request");
            return false;
        }

        debug!(slug = %slug, "Synchronous flush");
        match invalidator.flush().await {
            Ok(()) => true,
            Err(err) => {
                error!(slug = %slug, error = %err, "Synchronous flush failed");
                false
            }
        }
    }

    /// Advance the cascade by at most one item.
    pub async fn process(&self) -> TickOutcome {
        let document = match self.store.load(&self.key).await {
            Ok(Some(document)) => document,
            Ok(None) => return TickOutcome::Idle,
            Err(err) => {
                error!(key = %self.key, error = %err, "Queue read failed");
                return TickOutcome::StoreUnavailable;
            }
        };

        let mut queue = decode_queue(&document);
        if queue.is_empty() {
            if document.as_array().is_none_or(|rows| !rows.is_empty()) {
                warn!(key = %self.key, "Stored queue held no valid items; clearing");
                self.delete_key().await;
            }
            return TickOutcome::Idle;
        }

        let now = self.clock.now();
        if !queue[0].is_expired(now) {
            return TickOutcome::NotDue {
                slug: queue[0].slug.clone(),
                due_in: queue[0].expires - now,
            };
        }

        let head = queue.remove(0);
        let result = match self.registry.resolve(&head.slug) {
            Some(invalidator) => {
                info!(slug = %head.slug, remaining = queue.len(), "Processing queue item");
                self.run_flush(invalidator.as_ref()).await
            }
            None => {
                warn!(slug = %head.slug, "Unknown invalidator slug, removing from queue");
                counter!(METRIC_ITEMS_PROCESSED, "outcome" => "unknown_slug").increment(1);
                ItemResult::UnknownSlug
            }
        };

        let remaining: Vec<QueueItem> = queue.iter().map(|item| item.refresh(now)).collect();
        let persisted = if remaining.is_empty() {
            let deleted = self.delete_key().await;
            if deleted {
                info!(key = %self.key, "Cascade complete");
                counter!(METRIC_COMPLETE).increment(1);
                self.events.emit(CascadeEvent::Complete);
            }
            deleted
        } else {
            match self.store.save(&self.key, encode_queue(&remaining)).await {
                Ok(()) => {
                    let slugs: Vec<&str> = remaining.iter().map(|item| item.slug.as_str()).collect();
                    debug!(key = %self.key, remaining = ?slugs, "Queue updated");
                    true
                }
                Err(err) => {
                    error!(key = %self.key, error = %err, "Queue update failed");
                    false
                }
            }
        };
        gauge!(METRIC_QUEUE_LEN).set(remaining.len() as f64);

        TickOutcome::Processed {
            slug: head.slug,
            result,
            remaining: remaining.len(),
            persisted,
        }
    }

    /// Delete the persisted queue unconditionally.
    pub async fn clear_all(&self) -> bool {
        let cleared = self.delete_key().await;
        if cleared {
            info!(key = %self.key, "Queue cleared");
            gauge!(METRIC_QUEUE_LEN).set(0.0);
        }
        cleared
    }

    /// The decoded persisted queue, for status reporting.
    pub async fn pending(&self) -> Result<Vec<QueueItem>, StoreError> {
        Ok(self
            .store
            .load(&self.key)
            .await?
            .map(|document| decode_queue(&document))
            .unwrap_or_default())
    }

    /// The cascade currently buffered for this request, if any.
    pub fn buffered(&self) -> Option<Vec<QueueItem>> {
        self.with_request("buffered", |request| request.pending.clone())
    }

    fn with_request<R>(&self, op: &'static str, f: impl FnOnce(&mut RequestState) -> R) -> R {
        if in_request_scope() {
            REQUEST.with(|state| f(&mut state.borrow_mut()))
        } else {
            f(&mut mutex_lock(&self.unscoped, SOURCE, op))
        }
    }

    async fn run_flush(&self, invalidator: &dyn Invalidator) -> ItemResult {
        let slug = invalidator.slug().to_string();
        let started_at = Instant::now();

        let flush = async {
            let _processing = ProcessingGuard::enter();
            invalidator.flush().await
        };
        let result = if in_request_scope() {
            flush.await
        } else {
            request_scope(flush).await
        };

        histogram!(METRIC_FLUSH_MS, "slug" => slug.clone())
            .record(started_at.elapsed().as_secs_f64() * 1000.0);

        match result {
            Ok(()) => {
                info!(slug = %slug, "Flushed successfully");
                counter!(METRIC_ITEMS_PROCESSED, "outcome" => "flushed").increment(1);
                self.events.emit(CascadeEvent::ItemFlushed { slug });
                ItemResult::Flushed
            }
            Err(err) => {
                error!(slug = %slug, error = %err, "Flush failed");
                counter!(METRIC_ITEMS_PROCESSED, "outcome" => "failed").increment(1);
                ItemResult::Failed(err.to_string())
            }
        }
    }

    async fn delete_key(&self) -> bool {
        match self.store.delete(&self.key).await {
            Ok(()) => true,
            Err(err) => {
                error!(key = %self.key, error = %err, "Queue delete failed");
                false
            }
        }
    }
}
