//! The self-healing cache.
//!
//! [`HealingCache`] ties the entry registry, the store adapter and the
//! pending-reset queue together. It owns no global state: every instance is
//! isolated, and clones share the same underlying cache.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use super::config::CacheConfig;
use super::error::CacheError;
use super::queue::ResetQueue;
use super::registry::{EntryMeta, EntryRegistry};
use super::store::StoreAdapter;

/// Keys touched by a [`HealingCache::reset`] call, in processing order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResetOutcome {
    /// Keys whose builder succeeded and whose new value was stored.
    pub rebuilt: Vec<String>,
    /// Keys whose builder failed; they are now absent from the store.
    pub failed: Vec<String>,
}

impl ResetOutcome {
    pub fn is_empty(&self) -> bool {
        self.rebuilt.is_empty() && self.failed.is_empty()
    }
}

struct Inner<V, C> {
    config: CacheConfig,
    context: C,
    registry: EntryRegistry<V, C>,
    store: StoreAdapter<V>,
    queue: Arc<ResetQueue>,
}

/// In-process cache whose entries can rebuild themselves.
///
/// `V` is the cached value type and `C` the execution context handed to every
/// builder (for example a handle to repositories). The cache never inspects
/// the context.
pub struct HealingCache<V, C> {
    inner: Arc<Inner<V, C>>,
}

impl<V, C> Clone for HealingCache<V, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V, C> HealingCache<V, C>
where
    V: Clone + Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
{
    pub fn new(config: CacheConfig, context: C) -> Self {
        let queue = Arc::new(ResetQueue::new());
        let store = StoreAdapter::new(config.max_capacity, Arc::clone(&queue));
        Self {
            inner: Arc::new(Inner {
                config,
                context,
                registry: EntryRegistry::new(),
                store,
                queue,
            }),
        }
    }

    /// Return the cached value for `meta.key`, building it on a miss.
    ///
    /// On a miss the metadata is registered (unless the key is already
    /// known) and the builder runs once; concurrent callers for the same key
    /// wait for that single build. A failed build stores nothing, so the next
    /// call retries.
    pub async fn get_or_create(&self, meta: EntryMeta<V, C>) -> Result<V, CacheError> {
        let key = meta.key.clone();
        let directive = meta.policy.resolve(&self.inner.config);
        let inner = Arc::clone(&self.inner);

        let init = async move {
            let builder = meta.builder.clone();
            let policy = meta.policy;
            let registered_key = meta.key.clone();
            if inner.registry.register(meta) {
                debug!(key = %registered_key, %policy, "Registered cache entry");
            }
            builder.build(inner.context.clone()).await
        };

        self.inner
            .store
            .get_or_try_insert(key.clone(), directive, init)
            .await
            .map_err(|source| {
                debug!(key = %key, error = %source, "Cache entry build failed");
                CacheError::build(key, source)
            })
    }

    /// Store-level read. Never builds.
    pub async fn get(&self, key: &str) -> Option<V> {
        self.inner.store.get(key).await
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.store.contains(key)
    }

    /// Rebuild `key` from its registered builder and, with `cascade`, every
    /// key reachable through `related_keys`, depth first in declaration order.
    ///
    /// Unregistered keys are skipped silently. A failed or panicking rebuild
    /// leaves that key absent but does not stop the cascade. Each key is
    /// processed at most once per call, so shared dependents run once and
    /// cyclic dependencies terminate.
    #[instrument(skip(self))]
    pub async fn reset(&self, key: &str, cascade: bool) -> ResetOutcome {
        let mut outcome = ResetOutcome::default();
        let mut visited = HashSet::new();
        let mut pending = vec![key.to_string()];

        while let Some(current) = pending.pop() {
            if !visited.insert(current.clone()) {
                warn!(key = %current, root = key, "Key already reset in this cascade; skipping");
                continue;
            }

            let Some(meta) = self.inner.registry.lookup(&current) else {
                debug!(key = %current, "Reset skipped: key not registered");
                continue;
            };

            if self.rebuild(&meta).await {
                outcome.rebuilt.push(current);
            } else {
                outcome.failed.push(current);
            }

            if cascade {
                pending.extend(meta.related_keys.iter().rev().cloned());
            }
        }

        outcome
    }

    /// Build a fresh value, evict the old one, then store the new one.
    async fn rebuild(&self, meta: &EntryMeta<V, C>) -> bool {
        let result = meta.builder.build(self.inner.context.clone()).await;

        self.inner.store.remove(&meta.key).await;

        match result {
            Ok(value) => {
                let directive = meta.policy.resolve(&self.inner.config);
                self.inner
                    .store
                    .insert(meta.key.clone(), value, directive)
                    .await;
                debug!(key = %meta.key, policy = %meta.policy, "Rebuilt cache entry");
                true
            }
            Err(error) => {
                warn!(key = %meta.key, error = %error, "Cache entry rebuild failed; key left cold");
                false
            }
        }
    }

    /// Drop the stored value without rebuilding. Metadata stays registered.
    pub async fn invalidate(&self, key: &str) {
        self.inner.store.remove(key).await;
    }

    /// Queue `key` for the next reconciliation pass.
    pub fn request_reset(&self, key: &str) -> bool {
        self.inner.queue.enqueue(key)
    }

    /// Snapshot of every registered key.
    pub fn keys(&self) -> Vec<String> {
        self.inner.registry.keys()
    }

    pub fn is_registered(&self, key: &str) -> bool {
        self.inner.registry.contains(key)
    }

    /// Let the store evict expired entries, firing auto-reset hooks.
    pub async fn run_pending_tasks(&self) {
        self.inner.store.run_pending_tasks().await;
    }

    /// Approximate number of stored values.
    pub fn entry_count(&self) -> u64 {
        self.inner.store.entry_count()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn context(&self) -> &C {
        &self.inner.context
    }

    pub fn queue(&self) -> &Arc<ResetQueue> {
        &self.inner.queue
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::cache::builder::Builder;
    use crate::cache::error::BuildError;
    use crate::cache::policy::ExpirationPolicy;

    type Log = Arc<Mutex<Vec<String>>>;

    fn create_cache() -> HealingCache<String, Log> {
        HealingCache::new(CacheConfig::default(), Arc::new(Mutex::new(Vec::new())))
    }

    /// Builder that records its key in the shared context log.
    fn logging(key: &'static str) -> Builder<String, Log> {
        Builder::sync(move |log: Log| {
            log.lock().expect("log").push(key.to_string());
            Ok(format!("{key}-value"))
        })
    }

    fn failing() -> Builder<String, Log> {
        Builder::sync(|_| Err(BuildError::new("always fails")))
    }

    fn take_log(cache: &HealingCache<String, Log>) -> Vec<String> {
        std::mem::take(&mut *cache.context().lock().expect("log"))
    }

    #[tokio::test]
    async fn get_or_create_builds_once_then_hits() {
        let cache = create_cache();

        let first = cache
            .get_or_create(EntryMeta::new("Order:1", logging("Order:1")))
            .await
            .expect("build");
        let second = cache
            .get_or_create(EntryMeta::new("Order:1", logging("Order:1")))
            .await
            .expect("hit");

        assert_eq!(first, "Order:1-value");
        assert_eq!(second, first);
        assert_eq!(take_log(&cache), ["Order:1"]);
        assert!(cache.is_registered("Order:1"));
    }

    #[tokio::test]
    async fn get_or_create_failure_propagates_and_retries() {
        let cache = create_cache();

        let err = cache
            .get_or_create(EntryMeta::new("Order:1", failing()))
            .await
            .unwrap_err();
        assert_eq!(err.key(), "Order:1");
        assert!(!cache.contains("Order:1"));

        // The first registration is kept, but the store retries the build.
        let value = cache
            .get_or_create(EntryMeta::new("Order:1", logging("Order:1")))
            .await
            .expect("retry");
        assert_eq!(value, "Order:1-value");
    }

    #[tokio::test]
    async fn reset_of_unregistered_key_is_a_no_op() {
        let cache = create_cache();

        let outcome = cache.reset("Missing:1", true).await;

        assert!(outcome.is_empty());
        assert_eq!(cache.entry_count(), 0);
        assert!(cache.get("Missing:1").await.is_none());
    }

    #[tokio::test]
    async fn reset_replaces_value_with_fresh_build() {
        let cache = create_cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let builder = Builder::sync(move |_: Log| {
            Ok(format!("v{}", counter.fetch_add(1, Ordering::SeqCst)))
        });

        let value = cache
            .get_or_create(EntryMeta::new("Counter:1", builder))
            .await
            .expect("build");
        assert_eq!(value, "v0");

        let outcome = cache.reset("Counter:1", false).await;
        assert_eq!(outcome.rebuilt, ["Counter:1"]);
        assert_eq!(cache.get("Counter:1").await.as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn cascade_runs_depth_first_in_declared_order() {
        let cache = create_cache();
        for (key, related) in [
            ("A", vec!["B", "C"]),
            ("B", vec!["D"]),
            ("C", vec![]),
            ("D", vec![]),
        ] {
            cache
                .get_or_create(EntryMeta::new(key, logging(key)).with_related_keys(related))
                .await
                .expect("build");
        }
        take_log(&cache);

        let outcome = cache.reset("A", true).await;

        assert_eq!(take_log(&cache), ["A", "B", "D", "C"]);
        assert_eq!(outcome.rebuilt, ["A", "B", "D", "C"]);
    }

    #[tokio::test]
    async fn reset_without_cascade_leaves_dependents_alone() {
        let cache = create_cache();
        cache
            .get_or_create(EntryMeta::new("A", logging("A")).with_related_keys(["B"]))
            .await
            .expect("build");
        cache
            .get_or_create(EntryMeta::new("B", logging("B")))
            .await
            .expect("build");
        take_log(&cache);

        cache.reset("A", false).await;

        assert_eq!(take_log(&cache), ["A"]);
    }

    #[tokio::test]
    async fn failed_rebuild_evicts_and_cascade_continues() {
        let cache = create_cache();
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        // Succeeds once, then fails on every rebuild.
        let flaky = Builder::sync(move |_: Log| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok("first".to_string())
            } else {
                Err(BuildError::new("source gone"))
            }
        });

        cache
            .get_or_create(EntryMeta::new("A", flaky).with_related_keys(["B"]))
            .await
            .expect("build");
        cache
            .get_or_create(EntryMeta::new("B", logging("B")))
            .await
            .expect("build");
        take_log(&cache);

        let outcome = cache.reset("A", true).await;

        assert_eq!(outcome.failed, ["A"]);
        assert_eq!(outcome.rebuilt, ["B"]);
        assert!(cache.get("A").await.is_none());
        assert_eq!(cache.get("B").await.as_deref(), Some("B-value"));
    }

    #[tokio::test]
    async fn cyclic_dependencies_terminate() {
        let cache = create_cache();
        cache
            .get_or_create(EntryMeta::new("A", logging("A")).with_related_keys(["B"]))
            .await
            .expect("build");
        cache
            .get_or_create(EntryMeta::new("B", logging("B")).with_related_keys(["A"]))
            .await
            .expect("build");
        take_log(&cache);

        let outcome = cache.reset("A", true).await;

        assert_eq!(outcome.rebuilt, ["A", "B"]);
        assert_eq!(take_log(&cache), ["A", "B"]);
    }

    #[tokio::test]
    async fn shared_dependent_rebuilds_once_per_cascade() {
        let cache = create_cache();
        for (key, related) in [
            ("A", vec!["B", "C"]),
            ("B", vec!["D"]),
            ("C", vec!["D"]),
            ("D", vec![]),
        ] {
            cache
                .get_or_create(EntryMeta::new(key, logging(key)).with_related_keys(related))
                .await
                .expect("build");
        }
        take_log(&cache);

        let outcome = cache.reset("A", true).await;

        assert_eq!(take_log(&cache), ["A", "B", "D", "C"]);
        assert_eq!(outcome.rebuilt, ["A", "B", "D", "C"]);
    }

    #[tokio::test]
    async fn panicking_rebuild_evicts_and_cascade_continues() {
        let cache = create_cache();
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let explosive = Builder::sync(move |_: Log| {
            if counter.fetch_add(1, Ordering::SeqCst) > 0 {
                panic!("rebuild exploded");
            }
            Ok("stale".to_string())
        });

        cache
            .get_or_create(EntryMeta::new("A", explosive).with_related_keys(["B"]))
            .await
            .expect("build");
        cache
            .get_or_create(EntryMeta::new("B", logging("B")))
            .await
            .expect("build");
        take_log(&cache);

        let outcome = cache.reset("A", true).await;

        assert_eq!(outcome.failed, ["A"]);
        assert_eq!(outcome.rebuilt, ["B"]);
        assert!(cache.get("A").await.is_none());
        assert_eq!(take_log(&cache), ["B"]);
    }

    #[tokio::test]
    async fn reset_reapplies_policy() {
        let cache = create_cache();
        cache
            .get_or_create(
                EntryMeta::new("Order:1", logging("Order:1"))
                    .with_policy(ExpirationPolicy::LongTermAutoReset),
            )
            .await
            .expect("build");

        cache.reset("Order:1", false).await;
        cache.run_pending_tasks().await;

        assert!(cache.contains("Order:1"));
        // Replacing the entry during reset must not schedule another reset.
        assert!(cache.queue().is_empty());
    }

    #[tokio::test]
    async fn invalidate_keeps_metadata_for_later_rebuild() {
        let cache = create_cache();
        cache
            .get_or_create(EntryMeta::new("Order:1", logging("Order:1")))
            .await
            .expect("build");

        cache.invalidate("Order:1").await;
        assert!(cache.get("Order:1").await.is_none());
        assert!(cache.is_registered("Order:1"));

        cache.reset("Order:1", false).await;
        assert_eq!(cache.get("Order:1").await.as_deref(), Some("Order:1-value"));
    }
}
