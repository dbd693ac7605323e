//! Durable cache backend backed by redb.
//!
//! One table, `entries`: key → JSON bytes. Each call is its own transaction,
//! so a crash mid-sync leaves either the old or the new mirror, never half.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use serde_json::Value;

use super::LocalCache;

const ENTRIES: TableDefinition<&str, &[u8]> = TableDefinition::new("entries");

pub struct RedbCache {
    db: Database,
}

impl RedbCache {
    /// Open or create the cache database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create cache directory")?;
        }
        let db = Database::create(path)
            .with_context(|| format!("failed to open cache redb at {}", path.display()))?;
        // Ensure table exists
        let txn = db.begin_write()?;
        { let _ = txn.open_table(ENTRIES)?; }
        txn.commit()?;
        Ok(Self { db })
    }

    /// All stored keys, sorted.
    pub fn keys(&self) -> Result<Vec<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(ENTRIES)?;
        let mut keys = Vec::new();
        for entry in table.iter()? {
            let (k, _) = entry?;
            keys.push(k.value().to_string());
        }
        Ok(keys)
    }
}

#[async_trait]
impl LocalCache for RedbCache {
    fn backend_name(&self) -> &str {
        "redb"
    }

    async fn save(&self, key: &str, value: &Value) -> Result<()> {
        let data = serde_json::to_vec(value)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(ENTRIES)?;
            table.insert(key, data.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<Value>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(ENTRIES)?;
        match table.get(key)? {
            Some(data) => {
                let value = serde_json::from_slice(data.value())
                    .with_context(|| format!("corrupt cache entry {key}"))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(ENTRIES)?;
            table.remove(key)?;
        }
        txn.commit()?;
        Ok(())
    }
}
