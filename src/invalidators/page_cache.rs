//! Full-page cache and its invalidator.
//!
//! Cleaning the page cache notifies registered listeners before and after the
//! entries are dropped. Those notifications are how the cascade learns about
//! cleans it did not schedule itself, and they are also the signals the
//! processing flag must suppress when the clean was started by a tick.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use crate::cascade::{Invalidator, InvalidatorError, rw_read, rw_write};

const SOURCE: &str = "invalidators::page_cache";

pub const PAGE_CACHE_SLUG: &str = "page_cache";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PageCacheConfig {
    /// Whether a full-page cache is active in this deployment.
    pub enabled: bool,
}

/// A rendered response body cached by path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedPage {
    pub status: u16,
    pub content_type: String,
    pub body: String,
}

/// Observer of page-cache cleans.
#[async_trait]
pub trait PageCacheListener: Send + Sync {
    async fn before_clean(&self);
    async fn after_clean(&self);
}

#[derive(Default)]
pub struct PageCache {
    pages: RwLock<HashMap<String, CachedPage>>,
    listeners: RwLock<Vec<Weak<dyn PageCacheListener>>>,
}

impl PageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<CachedPage> {
        rw_read(&self.pages, SOURCE, "get").get(path).cloned()
    }

    pub fn put(&self, path: impl Into<String>, page: CachedPage) {
        rw_write(&self.pages, SOURCE, "put").insert(path.into(), page);
    }

    pub fn len(&self) -> usize {
        rw_read(&self.pages, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Listeners are held weakly; dropped listeners are pruned on the next clean.
    pub fn add_listener(&self, listener: Weak<dyn PageCacheListener>) {
        rw_write(&self.listeners, SOURCE, "add_listener").push(listener);
    }

    fn live_listeners(&self) -> Vec<Arc<dyn PageCacheListener>> {
        let mut listeners = rw_write(&self.listeners, SOURCE, "live_listeners");
        listeners.retain(|listener| listener.strong_count() > 0);
        listeners.iter().filter_map(Weak::upgrade).collect()
    }

    /// Drop every cached page, notifying listeners around the clean.
    pub async fn clean_domain(&self) -> usize {
        let listeners = self.live_listeners();

        for listener in &listeners {
            listener.before_clean().await;
        }

        let evicted = {
            let mut pages = rw_write(&self.pages, SOURCE, "clean_domain");
            let evicted = pages.len();
            pages.clear();
            evicted
        };
        info!(evicted, "Page cache cleaned");

        for listener in &listeners {
            listener.after_clean().await;
        }

        evicted
    }
}

/// Cleans the [`PageCache`]. Priority 10, 50s delay; available when enabled.
pub struct PageCacheInvalidator {
    cache: Arc<PageCache>,
    enabled: bool,
}

impl PageCacheInvalidator {
    pub fn new(cache: Arc<PageCache>, config: &PageCacheConfig) -> Self {
        Self {
            cache,
            enabled: config.enabled,
        }
    }
}

#[async_trait]
impl Invalidator for PageCacheInvalidator {
    fn slug(&self) -> &str {
        PAGE_CACHE_SLUG
    }

    fn is_available(&self) -> bool {
        self.enabled
    }

    fn priority(&self) -> i32 {
        10
    }

    fn delay(&self) -> i64 {
        50
    }

    async fn flush(&self) -> Result<(), InvalidatorError> {
        let evicted = self.cache.clean_domain().await;
        debug!(evicted, "Page cache invalidator flushed");
        Ok(())
    }
}
