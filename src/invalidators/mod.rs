//! Reference invalidators for the object cache, the page cache and Cloudflare.

mod cloudflare;
mod object_cache;
mod page_cache;

pub use cloudflare::{CLOUDFLARE_SLUG, CloudflareConfig, CloudflareInvalidator};
pub use object_cache::{
    OBJECT_CACHE_SLUG, ObjectCache, ObjectCacheConfig, ObjectCacheInvalidator,
};
pub use page_cache::{
    CachedPage, PAGE_CACHE_SLUG, PageCache, PageCacheConfig, PageCacheInvalidator,
    PageCacheListener,
};
