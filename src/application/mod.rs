//! Application layer: signal routing and the scheduled tick.

pub mod error;
pub mod invalidation;
pub mod jobs;
