//! Resilient client-side sync for asset-library collections.
//!
//! Each named collection is owned by a [`CollectionSyncEngine`] that keeps a
//! remote store and a local cache consistent across network failures,
//! concurrent writes and suspicious remote data loss.

pub mod collections;
pub mod config;
pub mod engine;
pub mod error;
pub mod guard;
pub mod ledger;
pub mod migration;
pub mod notify;
pub mod storage;
pub mod transport;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use engine::{CollectionSyncEngine, SyncContext, SyncPhase, SyncPolicy, SyncState};
pub use error::{GuardRejection, SyncError, TransportError, ValidationError};
