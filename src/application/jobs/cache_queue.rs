//! Cron job that advances the cache-invalidation cascade.

use std::str::FromStr;
use std::sync::Arc;

use apalis::prelude::*;
use apalis_cron::Schedule;

use crate::cascade::{CacheQueue, TickOutcome, request_scope};

/// Every minute at second 0.
pub const DEFAULT_CACHE_QUEUE_SCHEDULE: &str = "0 * * * * *";

/// Marker for one scheduler tick.
/// Must implement `From<chrono::DateTime<chrono::Utc>>` for apalis-cron compatibility.
#[derive(Default, Debug, Clone)]
pub struct CacheQueueTick;

impl From<chrono::DateTime<chrono::Utc>> for CacheQueueTick {
    fn from(_: chrono::DateTime<chrono::Utc>) -> Self {
        Self
    }
}

#[derive(Clone)]
pub struct CacheQueueContext {
    pub queue: Arc<CacheQueue>,
}

/// Run one tick. Never fails; the engine logs and absorbs its own errors.
pub async fn process_cache_queue_job(
    _job: CacheQueueTick,
    ctx: Data<CacheQueueContext>,
) -> Result<(), apalis::prelude::Error> {
    run_tick(&ctx.queue).await;
    Ok(())
}

/// One tick in its own request scope, followed by the end-of-request hook, so
/// the tick behaves like any other unit of work.
pub async fn run_tick(queue: &CacheQueue) -> TickOutcome {
    request_scope(tick(queue)).await
}

async fn tick(queue: &CacheQueue) -> TickOutcome {
    let outcome = queue.process().await;
    match &outcome {
        TickOutcome::Idle => {}
        TickOutcome::NotDue { slug, due_in } => {
            tracing::debug!(slug = %slug, due_in, "Cache queue head not due");
        }
        TickOutcome::Processed {
            slug, remaining, ..
        } => {
            tracing::debug!(slug = %slug, remaining, "Cache queue advanced");
        }
        TickOutcome::StoreUnavailable => {
            tracing::warn!("Cache queue tick skipped: store unavailable");
        }
    }
    queue.finish_request().await;
    outcome
}

/// Parse the tick schedule (six-field cron with seconds).
pub fn cache_queue_schedule(expression: &str) -> Result<Schedule, <Schedule as FromStr>::Err> {
    Schedule::from_str(expression)
}
