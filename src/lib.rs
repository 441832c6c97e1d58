//! Staggered cache invalidation.
//!
//! Content changes flag a cascade of cache backends (object cache, page cache,
//! CDN) that a periodic tick evicts one at a time, each after its own delay,
//! so the slow outer layers never refill from stale inner ones.

pub mod application;
pub mod cascade;
pub mod config;
pub mod infra;
pub mod invalidators;
