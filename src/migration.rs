//! One-time merge of a legacy shared collection into its per-user successor.
//!
//! Runs the first time a per-user collection is seen empty for a user that
//! has no migration marker. The marker is written before the merged value is
//! persisted anywhere, so a failed write can never cause a second merge that
//! resurrects items the user has since removed. Markers are never cleared.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;

use crate::collections::{CollectionSpec, CollectionValue};
use crate::storage::{self, LocalCache};
use crate::transport::RemoteStore;

pub struct MigrationResolver {
    remote: Arc<dyn RemoteStore>,
    cache: Arc<dyn LocalCache>,
}

impl MigrationResolver {
    pub fn new(remote: Arc<dyn RemoteStore>, cache: Arc<dyn LocalCache>) -> Self {
        Self { remote, cache }
    }

    pub async fn is_migrated(&self, collection: &str, user: &str) -> bool {
        match self.cache.load(&storage::migration_key(collection, user)).await {
            Ok(Some(Value::Bool(done))) => done,
            Ok(_) => false,
            Err(e) => {
                // Unreadable marker: assume done rather than risk a second merge
                tracing::warn!("Could not read migration marker for {}/{}: {}", collection, user, e);
                true
            }
        }
    }

    pub async fn mark_migrated(&self, collection: &str, user: &str) -> Result<()> {
        self.cache
            .save(&storage::migration_key(collection, user), &Value::Bool(true))
            .await
    }

    /// Merge legacy + cached values for `user`.
    ///
    /// Returns `Ok(None)` when the migration already ran. On success the
    /// marker is set and the merged value (possibly empty) is returned for
    /// the caller to persist. A transport failure reading the legacy
    /// collection aborts without setting the marker, so the next load retries.
    pub async fn run<T: CollectionValue>(&self, spec: &CollectionSpec<T>, user: &str) -> Result<Option<T>> {
        if self.is_migrated(&spec.name, user).await {
            return Ok(None);
        }

        let legacy: T = match spec.legacy {
            Some(ref legacy_name) => {
                let raw = self
                    .remote
                    .fetch(legacy_name, None)
                    .await
                    .with_context(|| format!("failed to read legacy collection {legacy_name}"))?;
                match raw {
                    Some(value) => serde_json::from_value(value).unwrap_or_else(|e| {
                        tracing::warn!("Legacy collection {} is malformed, ignoring: {}", legacy_name, e);
                        T::default()
                    }),
                    None => T::default(),
                }
            }
            None => T::default(),
        };

        let cache_key = storage::collection_key(&spec.name, Some(user));
        let cached: T = storage::load_or_default(self.cache.as_ref(), &cache_key).await;

        let legacy_count = legacy.item_count();
        let cached_count = cached.item_count();
        let merged = legacy.merge_first_wins(cached);

        self.mark_migrated(&spec.name, user)
            .await
            .context("failed to set migration marker")?;

        tracing::info!(
            "Migrated {} for {}: {} legacy + {} cached → {} items",
            spec.name,
            user,
            legacy_count,
            cached_count,
            merged.item_count()
        );

        Ok(Some(merged))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collections::{saved_items, SavedItem, LEGACY_SAVED_ITEMS, SAVED_ITEMS};
    use crate::storage::MemoryCache;
    use crate::testing::ScriptedRemote;
    use serde_json::json;

    fn resolver(remote: &Arc<ScriptedRemote>, cache: &Arc<MemoryCache>) -> MigrationResolver {
        MigrationResolver::new(remote.clone(), cache.clone())
    }

    #[tokio::test]
    async fn test_merges_legacy_and_cache_once() {
        let remote = Arc::new(ScriptedRemote::new());
        let cache = Arc::new(MemoryCache::new());
        remote.set(
            LEGACY_SAVED_ITEMS,
            None,
            json!([{"templateId": "a"}, {"templateId": "b"}]),
        );
        cache
            .save(
                &storage::collection_key(SAVED_ITEMS, Some("u1")),
                &json!([{"templateId": "b"}, {"templateId": "c", "variantKey": "dark"}]),
            )
            .await
            .unwrap();

        let resolver = resolver(&remote, &cache);
        let merged = resolver.run(&saved_items(), "u1").await.unwrap().unwrap();
        assert_eq!(
            merged,
            vec![
                SavedItem::new("a", None),
                SavedItem::new("b", None),
                SavedItem::new("c", Some("dark")),
            ]
        );
        assert!(resolver.is_migrated(SAVED_ITEMS, "u1").await);

        // Second run is a no-op
        assert!(resolver.run(&saved_items(), "u1").await.unwrap().is_none());
        // Other users are independent
        assert!(!resolver.is_migrated(SAVED_ITEMS, "u2").await);
    }

    #[tokio::test]
    async fn test_empty_merge_still_sets_marker() {
        let remote = Arc::new(ScriptedRemote::new());
        let cache = Arc::new(MemoryCache::new());

        let resolver = resolver(&remote, &cache);
        let merged = resolver.run(&saved_items(), "u1").await.unwrap().unwrap();
        assert!(merged.is_empty());
        assert!(resolver.is_migrated(SAVED_ITEMS, "u1").await);
    }

    #[tokio::test]
    async fn test_unreachable_legacy_leaves_marker_unset() {
        let remote = Arc::new(ScriptedRemote::new());
        let cache = Arc::new(MemoryCache::new());
        remote.set_offline(true);

        let resolver = resolver(&remote, &cache);
        assert!(resolver.run(&saved_items(), "u1").await.is_err());
        assert!(!resolver.is_migrated(SAVED_ITEMS, "u1").await);
    }

    #[tokio::test]
    async fn test_malformed_legacy_is_ignored() {
        let remote = Arc::new(ScriptedRemote::new());
        let cache = Arc::new(MemoryCache::new());
        remote.set(LEGACY_SAVED_ITEMS, None, json!({"unexpected": true}));

        let resolver = resolver(&remote, &cache);
        let merged = resolver.run(&saved_items(), "u1").await.unwrap().unwrap();
        assert!(merged.is_empty());
    }
}
