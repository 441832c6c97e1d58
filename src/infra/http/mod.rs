mod middleware;

pub use middleware::flush_queue_writes;
