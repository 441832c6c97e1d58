//! Poison-tolerant lock access.
//!
//! Buffers, listener lists and the in-memory store stay usable after a panic
//! elsewhere; the poisoned guard is taken over and the event is logged and
//! counted against the call site that found it.

use std::sync::{LockResult, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use metrics::counter;
use tracing::warn;

pub const METRIC_LOCK_POISONED: &str = "cascade_lock_poisoned_total";

fn recover<G>(
    result: LockResult<G>,
    source: &'static str,
    op: &'static str,
    kind: &'static str,
) -> G {
    result.unwrap_or_else(|poisoned| {
        warn!(
            source,
            op,
            kind,
            "Lock poisoned by an earlier panic; continuing with its last state"
        );
        counter!(METRIC_LOCK_POISONED, "source" => source, "kind" => kind).increment(1);
        poisoned.into_inner()
    })
}

pub(crate) fn mutex_lock<'a, T>(
    lock: &'a Mutex<T>,
    source: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    recover(lock.lock(), source, op, "mutex")
}

pub(crate) fn rw_read<'a, T>(
    lock: &'a RwLock<T>,
    source: &'static str,
    op: &'static str,
) -> RwLockReadGuard<'a, T> {
    recover(lock.read(), source, op, "read")
}

pub(crate) fn rw_write<'a, T>(
    lock: &'a RwLock<T>,
    source: &'static str,
    op: &'static str,
) -> RwLockWriteGuard<'a, T> {
    recover(lock.write(), source, op, "write")
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;

    #[test]
    fn mutex_lock_recovers_after_poison() {
        let lock = Mutex::new(vec![1]);

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = lock.lock().expect("lock should be acquired");
            panic!("poison the buffer lock");
        }));

        mutex_lock(&lock, "test", "push").push(2);
        assert_eq!(*mutex_lock(&lock, "test", "read"), vec![1, 2]);
    }

    #[test]
    fn rw_write_recovers_after_poison() {
        let lock = RwLock::new(0_u32);

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = lock.write().expect("lock should be acquired");
            panic!("poison the listener lock");
        }));

        *rw_write(&lock, "test", "set") = 7;
        assert_eq!(*rw_read(&lock, "test", "get"), 7);
    }

    #[test]
    fn recovery_is_counted_per_source() {
        let recorder = metrics_util::debugging::DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let lock = Mutex::new(0_u8);

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = lock.lock().expect("lock should be acquired");
            panic!("poison the request lock");
        }));

        metrics::with_local_recorder(&recorder, || {
            *mutex_lock(&lock, "cascade::queue", "write") = 1;
        });

        let recorded: Vec<String> = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .map(|(key, _, _, _)| key.key().name().to_string())
            .collect();
        assert_eq!(recorded, [METRIC_LOCK_POISONED]);
        assert_eq!(*mutex_lock(&lock, "test", "read"), 1);
    }
}
