//! Local cache abstraction.
//!
//! - [`RedbCache`]: redb file on disk (default, survives restarts)
//! - [`MemoryCache`]: process-local map (tests, hosts without durable storage)
//!
//! The cache mirrors the remote store. It is only ever read as the source of
//! truth when the remote is unreachable or returned something suspicious.
//!
//! ```text
//! collection:{name}              → JSON value (shared collections)
//! collection:{name}:{user}       → JSON value (per-user collections)
//! last-known-good                → JSON map of LastKnownGood records
//! migrated:{name}:{user}         → true
//! ```

pub mod local;
pub mod memory;

pub use local::RedbCache;
pub use memory::MemoryCache;

use anyhow::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

pub const LAST_KNOWN_GOOD_KEY: &str = "last-known-good";

/// Durable key/value store behind the sync engine.
#[async_trait]
pub trait LocalCache: Send + Sync {
    /// Human-readable backend name (e.g., "redb", "memory").
    fn backend_name(&self) -> &str;

    async fn save(&self, key: &str, value: &Value) -> Result<()>;

    /// `None` when nothing is stored under `key`.
    async fn load(&self, key: &str) -> Result<Option<Value>>;

    async fn remove(&self, key: &str) -> Result<()>;
}

/// Cache key for a collection's mirrored value.
pub fn collection_key(name: &str, user: Option<&str>) -> String {
    match user {
        Some(user) => format!("collection:{name}:{user}"),
        None => format!("collection:{name}"),
    }
}

/// Cache key for a per-user migration marker.
pub fn migration_key(name: &str, user: &str) -> String {
    format!("migrated:{name}:{user}")
}

/// Load and decode `key`, falling back to `T::default()` when the entry is
/// missing, unreadable, or corrupt.
pub async fn load_or_default<T>(cache: &dyn LocalCache, key: &str) -> T
where
    T: DeserializeOwned + Default,
{
    match cache.load(key).await {
        Ok(Some(value)) => match serde_json::from_value(value) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::warn!("Cache entry {} is corrupt, using default: {}", key, e);
                T::default()
            }
        },
        Ok(None) => T::default(),
        Err(e) => {
            tracing::warn!("Could not read cache entry {}: {}", key, e);
            T::default()
        }
    }
}

/// Encode and store `value` under `key`.
pub async fn save_typed<T: Serialize>(cache: &dyn LocalCache, key: &str, value: &T) -> Result<()> {
    let json = serde_json::to_value(value)?;
    cache.save(key, &json).await
}
