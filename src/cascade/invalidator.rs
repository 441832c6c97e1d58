//! Invalidator capability contract and the slug registry.
//!
//! Each cache backend (object cache, page cache, CDN) implements
//! [`Invalidator`]. The engine persists only slugs and resolves them back to
//! instances through [`InvalidatorRegistry`] when an item becomes due.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cascade::invalidator";

/// Failure raised by a backend flush.
#[derive(Debug, Error)]
pub enum InvalidatorError {
    #[error("{backend} request failed: {message}")]
    Transport {
        backend: &'static str,
        message: String,
    },
    #[error("{backend} responded with HTTP {status}: {body}")]
    Status {
        backend: &'static str,
        status: u16,
        body: String,
    },
    #[error("{backend} rejected the purge: {message}")]
    Rejected {
        backend: &'static str,
        message: String,
    },
    #[error("{backend} purge is misconfigured: {message}")]
    Invalid {
        backend: &'static str,
        message: String,
    },
    #[error("{backend} returned a malformed response: {message}")]
    Malformed {
        backend: &'static str,
        message: String,
    },
}

/// One cache backend's eviction action plus its scheduling metadata.
#[async_trait]
pub trait Invalidator: Send + Sync {
    /// Stable identifier, used as the persisted key and in logs.
    fn slug(&self) -> &str;

    /// Whether the backend is configured and usable. Must be cheap and free of
    /// side effects; it runs on every queue write.
    fn is_available(&self) -> bool;

    /// Lower sorts earlier in a cascade.
    fn priority(&self) -> i32;

    /// Seconds added to "now" when this item is scheduled or refreshed.
    fn delay(&self) -> i64;

    /// Perform the eviction.
    async fn flush(&self) -> Result<(), InvalidatorError>;
}

impl fmt::Debug for dyn Invalidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invalidator")
            .field("slug", &self.slug())
            .field("priority", &self.priority())
            .field("delay", &self.delay())
            .finish()
    }
}

/// Slug-keyed invalidator lookup with operational availability overrides.
#[derive(Default)]
pub struct InvalidatorRegistry {
    invalidators: HashMap<String, Arc<dyn Invalidator>>,
    overrides: RwLock<HashMap<String, bool>>,
}

impl InvalidatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an invalidator, replacing any earlier one with the same slug.
    pub fn register(&mut self, invalidator: Arc<dyn Invalidator>) {
        let slug = invalidator.slug().to_string();
        debug!(slug = %slug, "Registered invalidator");
        self.invalidators.insert(slug, invalidator);
    }

    pub fn with(mut self, invalidator: Arc<dyn Invalidator>) -> Self {
        self.register(invalidator);
        self
    }

    pub fn resolve(&self, slug: &str) -> Option<Arc<dyn Invalidator>> {
        self.invalidators.get(slug).cloned()
    }

    /// Resolve several slugs, skipping any that are not registered.
    pub fn resolve_all<'a>(
        &self,
        slugs: impl IntoIterator<Item = &'a str>,
    ) -> Vec<Arc<dyn Invalidator>> {
        slugs
            .into_iter()
            .filter_map(|slug| self.resolve(slug))
            .collect()
    }

    pub fn slugs(&self) -> Vec<&str> {
        let mut slugs: Vec<&str> = self.invalidators.keys().map(String::as_str).collect();
        slugs.sort_unstable();
        slugs
    }

    pub fn len(&self) -> usize {
        self.invalidators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invalidators.is_empty()
    }

    /// Force a backend on or off regardless of its own predicate.
    /// `None` removes the override.
    pub fn set_availability_override(&self, slug: &str, value: Option<bool>) {
        let mut overrides = rw_write(&self.overrides, SOURCE, "set_availability_override");
        match value {
            Some(value) => {
                overrides.insert(slug.to_string(), value);
            }
            None => {
                overrides.remove(slug);
            }
        }
    }

    /// Availability as seen by the engine: the override when one is set,
    /// otherwise the invalidator's own predicate.
    pub fn is_available(&self, invalidator: &dyn Invalidator) -> bool {
        let forced = rw_read(&self.overrides, SOURCE, "is_available")
            .get(invalidator.slug())
            .copied();
        forced.unwrap_or_else(|| invalidator.is_available())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        slug: &'static str,
        available: bool,
    }

    #[async_trait]
    impl Invalidator for Fixed {
        fn slug(&self) -> &str {
            self.slug
        }

        fn is_available(&self) -> bool {
            self.available
        }

        fn priority(&self) -> i32 {
            0
        }

        fn delay(&self) -> i64 {
            10
        }

        async fn flush(&self) -> Result<(), InvalidatorError> {
            Ok(())
        }
    }

    fn fixed(slug: &'static str, available: bool) -> Arc<dyn Invalidator> {
        Arc::new(Fixed { slug, available })
    }

    #[test]
    fn resolves_registered_slugs() {
        let registry = InvalidatorRegistry::new()
            .with(fixed("object_cache", true))
            .with(fixed("cloudflare", false));

        assert!(registry.resolve("object_cache").is_some());
        assert!(registry.resolve("cloudfront").is_none());
        assert_eq!(registry.slugs(), ["cloudflare", "object_cache"]);
    }

    #[test]
    fn resolve_all_skips_unknown() {
        let registry = InvalidatorRegistry::new().with(fixed("object_cache", true));
        let resolved = registry.resolve_all(["object_cache", "missing"]);
        assert_eq!(resolved.len(), 1);
    }

    #[test]
    fn override_wins_over_predicate() {
        let registry = InvalidatorRegistry::new();
        let cdn = fixed("cloudflare", true);

        assert!(registry.is_available(cdn.as_ref()));

        registry.set_availability_override("cloudflare", Some(false));
        assert!(!registry.is_available(cdn.as_ref()));

        registry.set_availability_override("cloudflare", None);
        assert!(registry.is_available(cdn.as_ref()));
    }

    #[test]
    fn override_can_force_unavailable_backend_on() {
        let registry = InvalidatorRegistry::new();
        let cdn = fixed("cloudflare", false);

        registry.set_availability_override("cloudflare", Some(true));
        assert!(registry.is_available(cdn.as_ref()));
    }

    #[test]
    fn errors_render_backend_context() {
        let error = InvalidatorError::Status {
            backend: "Cloudflare",
            status: 403,
            body: "Auth error".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Cloudflare responded with HTTP 403: Auth error"
        );
    }
}
