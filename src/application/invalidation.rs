//! Signal routing for the cascade.
//!
//! Decides the operating mode once at construction and maps each
//! [`CacheSignal`] to the invalidators it should queue.
//!
//! Delegated mode (page cache active):
//! - the page cache and editors handle day-to-day content changes
//! - the object cache is flushed synchronously right before a page-cache clean
//! - CDNs are queued right after a page-cache clean
//! - unattended events (visibility change, deploy, clear-all) queue the page
//!   cache plus CDNs
//!
//! Standalone mode: every content signal queues the object cache plus CDNs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::cascade::{CacheQueue, CacheSignal, Invalidator, OperatingMode, WriteOutcome};
use crate::invalidators::{
    CLOUDFLARE_SLUG, OBJECT_CACHE_SLUG, PAGE_CACHE_SLUG, PageCache, PageCacheListener,
};

/// Slugs of the CDN invalidators, in no particular order.
pub const CDN_SLUGS: &[&str] = &[CLOUDFLARE_SLUG];

/// What a handled signal did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalOutcome {
    Queued(WriteOutcome),
    /// The object cache was flushed in-line; false when it was skipped or failed.
    SyncFlushed(bool),
    /// The signal has no route in the current mode.
    Unrouted,
}

pub struct CacheInvalidation {
    queue: Arc<CacheQueue>,
    mode: OperatingMode,
    routes: HashMap<CacheSignal, Vec<Arc<dyn Invalidator>>>,
}

impl CacheInvalidation {
    pub fn new(queue: Arc<CacheQueue>, mode: OperatingMode) -> Self {
        let mode = resolve_mode(&queue, mode);
        let routes = build_routes(&queue, mode);
        info!(mode = ?mode, routes = routes.len(), "Cache invalidation routes ready");
        Self {
            queue,
            mode,
            routes,
        }
    }

    /// Either `Delegated` or `Standalone`; never `Auto`.
    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    pub fn queue(&self) -> &Arc<CacheQueue> {
        &self.queue
    }

    /// Slugs routed for `signal`, in registration order.
    pub fn route(&self, signal: CacheSignal) -> Vec<&str> {
        self.routes
            .get(&signal)
            .map(|invalidators| invalidators.iter().map(|i| i.slug()).collect())
            .unwrap_or_default()
    }

    /// Queue the route for `signal`. Returns `None` when it has no queue route.
    pub fn dispatch(&self, signal: CacheSignal) -> Option<WriteOutcome> {
        let invalidators = self.routes.get(&signal)?;
        debug!(signal = %signal, "Dispatching cache signal");
        Some(self.queue.write(invalidators))
    }

    /// Handle any signal, including the synchronous pre-clean flush.
    pub async fn handle(&self, signal: CacheSignal) -> SignalOutcome {
        if signal == CacheSignal::BeforePageCacheClean && self.mode == OperatingMode::Delegated {
            return SignalOutcome::SyncFlushed(self.sync_object_cache_flush().await);
        }

        match self.dispatch(signal) {
            Some(outcome) => SignalOutcome::Queued(outcome),
            None => {
                debug!(signal = %signal, mode = ?self.mode, "Signal has no route");
                SignalOutcome::Unrouted
            }
        }
    }

    /// Register as a clean listener. Only delegated mode reacts to cleans.
    pub fn attach(self: &Arc<Self>, page_cache: &PageCache) {
        let listener: Arc<dyn PageCacheListener> = self.clone();
        page_cache.add_listener(Arc::downgrade(&listener));
    }

    /// Flush the object cache before the page cache rebuilds. Runs at most
    /// once per request however many times the clean fires.
    async fn sync_object_cache_flush(&self) -> bool {
        let Some(object_cache) = self.queue.registry().resolve(OBJECT_CACHE_SLUG) else {
            debug!("Object cache not registered; skipping synchronous flush");
            return false;
        };
        debug!("Synchronous object cache flush before page cache clean");
        self.queue.flush_now(object_cache.as_ref()).await
    }
}

#[async_trait]
impl PageCacheListener for CacheInvalidation {
    async fn before_clean(&self) {
        if self.mode == OperatingMode::Delegated {
            self.sync_object_cache_flush().await;
        }
    }

    async fn after_clean(&self) {
        if self.mode == OperatingMode::Delegated {
            self.dispatch(CacheSignal::AfterPageCacheClean);
        }
    }
}

fn resolve_mode(queue: &CacheQueue, mode: OperatingMode) -> OperatingMode {
    match mode {
        OperatingMode::Auto => {
            let registry = queue.registry();
            let page_cache_active = registry
                .resolve(PAGE_CACHE_SLUG)
                .is_some_and(|page_cache| registry.is_available(page_cache.as_ref()));
            if page_cache_active {
                OperatingMode::Delegated
            } else {
                OperatingMode::Standalone
            }
        }
        forced => forced,
    }
}

fn build_routes(
    queue: &CacheQueue,
    mode: OperatingMode,
) -> HashMap<CacheSignal, Vec<Arc<dyn Invalidator>>> {
    let registry = queue.registry();
    let with_cdns = |lead: &'static str| {
        registry.resolve_all(std::iter::once(lead).chain(CDN_SLUGS.iter().copied()))
    };

    let mut routes = HashMap::new();
    match mode {
        OperatingMode::Delegated => {
            let page_cache_and_cdns = with_cdns(PAGE_CACHE_SLUG);
            for signal in [
                CacheSignal::VisibilityChanged,
                CacheSignal::DeploymentComplete,
                CacheSignal::ClearAll,
            ] {
                routes.insert(signal, page_cache_and_cdns.clone());
            }
            routes.insert(
                CacheSignal::AfterPageCacheClean,
                registry.resolve_all(CDN_SLUGS.iter().copied()),
            );
        }
        OperatingMode::Standalone | OperatingMode::Auto => {
            let object_cache_and_cdns = with_cdns(OBJECT_CACHE_SLUG);
            for signal in [
                CacheSignal::ContentUpdated,
                CacheSignal::VisibilityChanged,
                CacheSignal::FieldsSaved,
                CacheSignal::DeploymentComplete,
                CacheSignal::ClearAll,
            ] {
                routes.insert(signal, object_cache_and_cdns.clone());
            }
        }
    }
    routes
}
