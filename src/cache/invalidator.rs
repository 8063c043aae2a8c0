//! Entity-change invalidation.
//!
//! Cache keys follow the `"<EntityType>:<scope>"` convention. When a unit of
//! work reports which entity types changed, every registered key whose
//! leading segment names one of those types is queued for a rebuild.

use std::collections::HashSet;

use tracing::{debug, info};

use super::engine::HealingCache;

/// Entity type a key belongs to: the text before the first `:`.
pub fn entity_type_of(key: &str) -> &str {
    key.split(':').next().unwrap_or(key)
}

/// Changed entity type names collected from one unit of work.
///
/// Fully qualified type names are reduced to their last path segment, so
/// `billing.model.Order` and `billing::model::Order` both record `Order`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    names: HashSet<String>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, type_name: &str) {
        let name = short_type_name(type_name);
        if !name.is_empty() {
            self.names.insert(name.to_string());
        }
    }

    pub fn names(&self) -> &HashSet<String> {
        &self.names
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl<S: AsRef<str>> FromIterator<S> for ChangeSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut changes = Self::new();
        for name in iter {
            changes.record(name.as_ref());
        }
        changes
    }
}

fn short_type_name(type_name: &str) -> &str {
    let trimmed = type_name.trim();
    let tail = trimmed.rsplit("::").next().unwrap_or(trimmed);
    tail.rsplit('.').next().unwrap_or(tail)
}

impl<V, C> HealingCache<V, C>
where
    V: Clone + Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
{
    /// Queue every registered key whose entity type is in `changed`.
    ///
    /// Matching compares the whole leading segment, so `User` does not match
    /// `UserProfile:1`. Returns the number of keys newly queued.
    pub fn on_entities_changed(&self, changed: &HashSet<String>) -> usize {
        if changed.is_empty() {
            return 0;
        }

        let queued = self
            .keys()
            .into_iter()
            .filter(|key| changed.contains(entity_type_of(key)))
            .filter(|key| self.request_reset(key))
            .inspect(|key| debug!(key = %key, "Entity change queued cache key for reset"))
            .count();

        if queued > 0 {
            info!(
                entity_types = ?changed,
                queued,
                "Entity change invalidation queued cache keys"
            );
        }
        queued
    }

    /// Feed a collected [`ChangeSet`] through [`Self::on_entities_changed`].
    pub fn apply_changes(&self, changes: &ChangeSet) -> usize {
        self.on_entities_changed(changes.names())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::builder::Builder;
    use crate::cache::config::CacheConfig;
    use crate::cache::registry::EntryMeta;

    async fn cache_with(keys: &[&str]) -> HealingCache<String, ()> {
        let cache = HealingCache::new(CacheConfig::default(), ());
        for key in keys {
            let value = key.to_string();
            cache
                .get_or_create(EntryMeta::new(
                    *key,
                    Builder::sync(move |()| Ok(value.clone())),
                ))
                .await
                .expect("build");
        }
        cache
    }

    fn names(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn entity_type_is_leading_segment() {
        assert_eq!(entity_type_of("Order:1"), "Order");
        assert_eq!(entity_type_of("Order:1:lines"), "Order");
        assert_eq!(entity_type_of("Settings"), "Settings");
        assert_eq!(entity_type_of(""), "");
    }

    #[test]
    fn change_set_normalizes_qualified_names() {
        let changes: ChangeSet = ["billing.model.Order", "billing::model::Invoice", " User "]
            .into_iter()
            .collect();

        assert_eq!(changes.names(), &names(&["Order", "Invoice", "User"]));
    }

    #[test]
    fn change_set_ignores_blank_names() {
        let changes: ChangeSet = ["", "  "].into_iter().collect();
        assert!(changes.is_empty());
    }

    #[tokio::test]
    async fn matches_exact_entity_type_only() {
        let cache = cache_with(&["Order:1", "Order:2", "OrderLine:1"]).await;

        let queued = cache.on_entities_changed(&names(&["Order"]));

        assert_eq!(queued, 2);
        let mut pending = cache.queue().snapshot();
        pending.sort();
        assert_eq!(pending, ["Order:1", "Order:2"]);
    }

    #[tokio::test]
    async fn prefix_of_longer_type_does_not_match() {
        let cache = cache_with(&["UserProfile:1", "User:7"]).await;

        cache.on_entities_changed(&names(&["User"]));

        assert_eq!(cache.queue().snapshot(), ["User:7"]);
    }

    #[tokio::test]
    async fn already_pending_keys_are_not_counted_twice() {
        let cache = cache_with(&["Order:1"]).await;

        assert_eq!(cache.on_entities_changed(&names(&["Order"])), 1);
        assert_eq!(cache.on_entities_changed(&names(&["Order"])), 0);
        assert_eq!(cache.queue().len(), 1);
    }

    #[tokio::test]
    async fn apply_changes_uses_normalized_names() {
        let cache = cache_with(&["Invoice:3", "Order:1"]).await;

        let changes: ChangeSet = ["billing::model::Invoice"].into_iter().collect();
        assert_eq!(cache.apply_changes(&changes), 1);
        assert_eq!(cache.queue().snapshot(), ["Invoice:3"]);
    }
}
