//! Entry registry.
//!
//! Remembers how to rebuild every key the cache has seen. The registry only
//! holds metadata; stored values live in the store adapter.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::builder::Builder;
use super::policy::ExpirationPolicy;

/// Rebuild metadata for one cache key.
///
/// Immutable once registered. The builder already carries its parameters.
pub struct EntryMeta<V, C> {
    pub(crate) key: String,
    pub(crate) policy: ExpirationPolicy,
    pub(crate) related_keys: Vec<String>,
    pub(crate) builder: Builder<V, C>,
}

impl<V, C> EntryMeta<V, C> {
    /// Describe `key` with the default [`ExpirationPolicy::Never`] and no
    /// dependents.
    pub fn new(key: impl Into<String>, builder: Builder<V, C>) -> Self {
        Self {
            key: key.into(),
            policy: ExpirationPolicy::default(),
            related_keys: Vec::new(),
            builder,
        }
    }

    pub fn with_policy(mut self, policy: ExpirationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Keys to reset, in order, whenever this key is reset with cascade.
    pub fn with_related_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.related_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn policy(&self) -> ExpirationPolicy {
        self.policy
    }

    pub fn related_keys(&self) -> &[String] {
        &self.related_keys
    }
}

/// Concurrent key → metadata map with first-writer-wins registration.
pub struct EntryRegistry<V, C> {
    entries: DashMap<String, Arc<EntryMeta<V, C>>>,
}

impl<V, C> EntryRegistry<V, C> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Insert metadata unless the key is already registered.
    ///
    /// Returns `true` only for the call that created the entry; later calls
    /// leave the original metadata untouched.
    pub fn register(&self, meta: EntryMeta<V, C>) -> bool {
        match self.entries.entry(meta.key.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(meta));
                true
            }
        }
    }

    /// Look up metadata. The shard guard is released before returning.
    pub fn lookup(&self, key: &str) -> Option<Arc<EntryMeta<V, C>>> {
        self.entries.get(key).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Snapshot of the registered keys at call time.
    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V, C> Default for EntryRegistry<V, C> {
    fn default() -> Self {
        Self::new()
    }
}
