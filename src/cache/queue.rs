//! Pending-reset queue.
//!
//! Deduplicated FIFO of keys waiting for a background rebuild. Fed by the
//! auto-reset eviction hook and by entity-change invalidation, drained by
//! the reconciler.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use super::lock::mutex_lock;

const SOURCE: &str = "cache::queue";

#[derive(Default)]
struct Pending {
    order: VecDeque<String>,
    members: HashSet<String>,
}

/// Queue of keys awaiting rebuild.
///
/// A key that is already pending keeps its original position when it is
/// enqueued again. Each dequeue hands a key to exactly one consumer.
pub struct ResetQueue {
    pending: Mutex<Pending>,
}

impl ResetQueue {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Pending::default()),
        }
    }

    /// Add `key` unless it is already pending.
    ///
    /// Returns `true` if the key was added.
    pub fn enqueue(&self, key: &str) -> bool {
        let mut pending = mutex_lock(&self.pending, SOURCE, "enqueue");
        if pending.members.contains(key) {
            return false;
        }
        pending.members.insert(key.to_string());
        pending.order.push_back(key.to_string());
        true
    }

    /// Remove and return the oldest pending key.
    pub fn try_dequeue(&self) -> Option<String> {
        let mut pending = mutex_lock(&self.pending, SOURCE, "try_dequeue");
        let key = pending.order.pop_front()?;
        pending.members.remove(&key);
        Some(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        mutex_lock(&self.pending, SOURCE, "contains")
            .members
            .contains(key)
    }

    /// Snapshot of the pending keys in dequeue order.
    pub fn snapshot(&self) -> Vec<String> {
        mutex_lock(&self.pending, SOURCE, "snapshot")
            .order
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.pending, SOURCE, "len").order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut pending = mutex_lock(&self.pending, SOURCE, "clear");
        pending.order.clear();
        pending.members.clear();
    }
}

impl Default for ResetQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn fifo_order() {
        let queue = ResetQueue::new();

        assert!(queue.enqueue("A"));
        assert!(queue.enqueue("B"));
        assert!(queue.enqueue("C"));

        assert_eq!(queue.try_dequeue().as_deref(), Some("A"));
        assert_eq!(queue.try_dequeue().as_deref(), Some("B"));
        assert_eq!(queue.try_dequeue().as_deref(), Some("C"));
        assert!(queue.try_dequeue().is_none());
    }

    #[test]
    fn duplicate_keeps_original_position() {
        let queue = ResetQueue::new();

        queue.enqueue("A");
        queue.enqueue("B");
        assert!(!queue.enqueue("A"));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.snapshot(), ["A", "B"]);
    }

    #[test]
    fn key_can_be_requeued_after_dequeue() {
        let queue = ResetQueue::new();

        queue.enqueue("A");
        assert_eq!(queue.try_dequeue().as_deref(), Some("A"));
        assert!(!queue.contains("A"));
        assert!(queue.enqueue("A"));
        assert!(queue.contains("A"));
    }

    #[test]
    fn clear_queue() {
        let queue = ResetQueue::new();

        queue.enqueue("A");
        queue.enqueue("B");
        assert!(!queue.is_empty());

        queue.clear();
        assert!(queue.is_empty());
        assert!(queue.enqueue("A"));
    }

    #[test]
    fn concurrent_consumers_dequeue_each_key_once() {
        let queue = Arc::new(ResetQueue::new());
        for i in 0..500 {
            queue.enqueue(&format!("Key:{i}"));
        }

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    let mut taken = Vec::new();
                    while let Some(key) = queue.try_dequeue() {
                        taken.push(key);
                    }
                    taken
                })
            })
            .collect();

        let mut all: Vec<String> = handles
            .into_iter()
            .flat_map(|handle| handle.join().expect("thread"))
            .collect();
        let total = all.len();
        all.sort();
        all.dedup();
        assert_eq!(total, 500);
        assert_eq!(all.len(), 500);
    }

    #[test]
    fn reset_queue_recovers_from_poisoned_lock() {
        let queue = ResetQueue::new();

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = queue.pending.lock().expect("queue lock should be acquired");
            panic!("poison queue lock");
        }));

        queue.enqueue("A");
        assert_eq!(queue.len(), 1);
    }
}
