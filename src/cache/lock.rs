use std::sync::{Mutex, MutexGuard};

use tracing::warn;

/// Acquire a mutex, recovering the guard if a previous holder panicked.
///
/// The guarded queue state stays structurally valid across a panic, so the
/// poison flag is logged and cleared instead of propagated.
pub(crate) fn mutex_lock<'a, T>(
    lock: &'a Mutex<T>,
    target: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(
                op,
                target_module = target,
                lock_kind = "mutex.lock",
                result = "poisoned_recovered",
                hint = "pending keys may be stale after panic in another thread",
                "Recovered from poisoned cache lock"
            );
            lock.clear_poison();
            poisoned.into_inner()
        }
    }
}
