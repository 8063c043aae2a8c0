//! Store adapter.
//!
//! Wraps the underlying TTL store (`moka`), translating expiration
//! directives into per-entry lifetimes and routing evictions of auto-reset
//! entries to the pending-reset queue.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::Expiry;
use moka::future::Cache;
use moka::notification::RemovalCause;
use tracing::{debug, trace};

use super::error::BuildError;
use super::policy::ExpirationDirective;
use super::queue::ResetQueue;

/// A stored value together with the directive it was written under.
#[derive(Clone)]
pub(crate) struct StoredEntry<V> {
    value: V,
    directive: ExpirationDirective,
}

/// Derives each entry's lifetime from its own directive.
struct DirectiveExpiry;

impl<V> Expiry<String, StoredEntry<V>> for DirectiveExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        entry: &StoredEntry<V>,
        _created_at: Instant,
    ) -> Option<Duration> {
        entry.directive.ttl()
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &StoredEntry<V>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        entry.directive.ttl()
    }
}

/// Eviction listener for auto-reset entries.
///
/// Only enqueues; it never touches the store or the registry.
struct AutoResetHook {
    queue: Arc<ResetQueue>,
}

impl AutoResetHook {
    fn on_removed<V>(&self, key: &str, entry: &StoredEntry<V>, cause: RemovalCause) {
        // Explicit removals and replacements come from the reset engine itself.
        if !entry.directive.auto_reset() || !cause.was_evicted() {
            return;
        }
        if self.queue.enqueue(key) {
            debug!(key, cause = ?cause, "Auto-reset entry evicted; queued for rebuild");
        }
    }
}

pub(crate) struct StoreAdapter<V> {
    entries: Cache<String, StoredEntry<V>>,
}

impl<V> StoreAdapter<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(max_capacity: Option<u64>, queue: Arc<ResetQueue>) -> Self {
        let hook = AutoResetHook { queue };
        let mut builder = Cache::builder()
            .expire_after(DirectiveExpiry)
            .eviction_listener(move |key: Arc<String>, entry: StoredEntry<V>, cause| {
                hook.on_removed(key.as_str(), &entry, cause);
            });
        if let Some(capacity) = max_capacity {
            builder = builder.max_capacity(capacity);
        }

        Self {
            entries: builder.build(),
        }
    }

    pub(crate) async fn get(&self, key: &str) -> Option<V> {
        let value = self.entries.get(key).await.map(|entry| entry.value);
        trace!(key, hit = value.is_some(), "Store lookup");
        value
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Return the stored value or run `init` to create it.
    ///
    /// Concurrent callers for the same missing key share one `init`; a failed
    /// `init` stores nothing and every waiter receives the same error.
    pub(crate) async fn get_or_try_insert<F>(
        &self,
        key: String,
        directive: ExpirationDirective,
        init: F,
    ) -> Result<V, Arc<BuildError>>
    where
        F: Future<Output = Result<V, BuildError>>,
    {
        self.entries
            .try_get_with(key, async move {
                init.await.map(|value| StoredEntry { value, directive })
            })
            .await
            .map(|entry| entry.value)
    }

    pub(crate) async fn insert(&self, key: String, value: V, directive: ExpirationDirective) {
        self.entries
            .insert(key, StoredEntry { value, directive })
            .await;
    }

    pub(crate) async fn remove(&self, key: &str) {
        self.entries.invalidate(key).await;
    }

    /// Run pending maintenance so expired entries are evicted and their
    /// listeners fire.
    pub(crate) async fn run_pending_tasks(&self) {
        self.entries.run_pending_tasks().await;
    }

    pub(crate) fn entry_count(&self) -> u64 {
        self.entries.entry_count()
    }
}
