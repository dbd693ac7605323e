//! Last-known-good ledger.
//!
//! Remembers how many items each collection had the last time the remote
//! store (or a confirmed write) showed it to us. When the remote later comes
//! back empty for a collection that used to be populated, the engine treats
//! that as suspected loss instead of truth.
//!
//! Stored as one JSON map under [`LAST_KNOWN_GOOD_KEY`], separate from the
//! collections' own cache entries so clobbering a mirror can't erase it.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::{self, LocalCache, LAST_KNOWN_GOOD_KEY};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastKnownGood {
    pub collection_name: String,
    pub item_count: usize,
    pub observed_at: DateTime<Utc>,
}

type Records = BTreeMap<String, LastKnownGood>;

#[derive(Clone)]
pub struct Ledger {
    cache: Arc<dyn LocalCache>,
    // Serializes read-modify-write of the shared map across collections
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Ledger {
    pub fn new(cache: Arc<dyn LocalCache>) -> Self {
        Self {
            cache,
            lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub async fn get(&self, collection: &str) -> Option<LastKnownGood> {
        self.all().await.remove(collection)
    }

    /// Last recorded item count, 0 when never observed.
    pub async fn count(&self, collection: &str) -> usize {
        self.get(collection).await.map(|r| r.item_count).unwrap_or(0)
    }

    pub async fn all(&self) -> Records {
        storage::load_or_default(self.cache.as_ref(), LAST_KNOWN_GOOD_KEY).await
    }

    pub async fn record(&self, collection: &str, item_count: usize) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut records = self.all().await;
        records.insert(
            collection.to_string(),
            LastKnownGood {
                collection_name: collection.to_string(),
                item_count,
                observed_at: Utc::now(),
            },
        );
        storage::save_typed(self.cache.as_ref(), LAST_KNOWN_GOOD_KEY, &records).await
    }
}
