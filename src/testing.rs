//! Scripted remote store for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::TransportError;
use crate::transport::RemoteStore;

#[derive(Default)]
pub struct ScriptedRemote {
    data: Mutex<HashMap<String, Value>>,
    offline: AtomicBool,
    fail_stores: AtomicBool,
    reject_stores: AtomicBool,
    store_delay: Mutex<Duration>,
    events: Mutex<Vec<String>>,
    fetches: AtomicUsize,
    stores: AtomicUsize,
}

impl ScriptedRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(collection: &str, identity: Option<&str>) -> String {
        match identity {
            Some(user) => format!("{collection}@{user}"),
            None => collection.to_string(),
        }
    }

    pub fn set(&self, collection: &str, identity: Option<&str>, value: Value) {
        self.data.lock().unwrap().insert(Self::key(collection, identity), value);
    }

    pub fn get(&self, collection: &str, identity: Option<&str>) -> Option<Value> {
        self.data.lock().unwrap().get(&Self::key(collection, identity)).cloned()
    }

    pub fn clear(&self, collection: &str, identity: Option<&str>) {
        self.data.lock().unwrap().remove(&Self::key(collection, identity));
    }

    /// Every call fails with a network error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Stores fail with a 503 while reads keep working.
    pub fn fail_stores(&self, fail: bool) {
        self.fail_stores.store(fail, Ordering::SeqCst);
    }

    /// Stores fail with a 400.
    pub fn reject_stores(&self, reject: bool) {
        self.reject_stores.store(reject, Ordering::SeqCst);
    }

    pub fn set_store_delay(&self, delay: Duration) {
        *self.store_delay.lock().unwrap() = delay;
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn store_count(&self) -> usize {
        self.stores.load(Ordering::SeqCst)
    }

    fn log(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl RemoteStore for ScriptedRemote {
    async fn fetch(&self, collection: &str, identity: Option<&str>) -> Result<Option<Value>, TransportError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(TransportError::Network("connection refused".into()));
        }
        Ok(self.get(collection, identity))
    }

    async fn store(&self, collection: &str, value: &Value, identity: Option<&str>) -> Result<(), TransportError> {
        let n = self.stores.fetch_add(1, Ordering::SeqCst);
        self.log(format!("store-start:{n}"));

        let delay = *self.store_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let result = if self.offline.load(Ordering::SeqCst) {
            Err(TransportError::Network("connection refused".into()))
        } else if self.reject_stores.load(Ordering::SeqCst) {
            Err(TransportError::Rejected { status: 400, body: "invalid".into() })
        } else if self.fail_stores.load(Ordering::SeqCst) {
            Err(TransportError::Server { status: 503, body: "unavailable".into() })
        } else {
            self.set(collection, identity, value.clone());
            Ok(())
        };

        self.log(format!("store-end:{n}"));
        result
    }
}
