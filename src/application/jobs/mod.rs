mod cache_queue;

pub use cache_queue::{
    CacheQueueContext, CacheQueueTick, DEFAULT_CACHE_QUEUE_SCHEDULE, cache_queue_schedule,
    process_cache_queue_job, run_tick,
};
