//! Per-collection sync engine.
//!
//! One [`CollectionSyncEngine`] per named collection. It owns the
//! collection's [`SyncState`], publishes it on a `watch` channel, and is the
//! only thing that mutates it:
//!
//! ```text
//! Loading ─┬─> Loaded (remote)
//!          └─> LoadedFallback (cache) ──reconcile──> Reconciled
//!              Loaded ──save──> Syncing ──> Loaded | LoadedFallback
//! ```
//!
//! Loads, saves and reconciliation passes are serialized per collection by
//! `write_lock`. A save validates and guards against the value committed by
//! whatever held the lock before it.

mod reconcile;
mod state;


pub use state::{SyncPhase, SyncState};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{watch, Notify, OwnedMutexGuard};
use tokio::task::JoinHandle;

use crate::collections::{CollectionSpec, CollectionValue, Scope, WriteMode};
use crate::config::Config;
use crate::error::{SuspiciousEmptyRemote, SyncError, TransportError};
use crate::guard::GuardPolicy;
use crate::ledger::Ledger;
use crate::migration::MigrationResolver;
use crate::notify::{Notifier, TracingNotifier};
use crate::storage::{self, LocalCache, RedbCache};
use crate::transport::{HttpTransport, RemoteStore};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncPolicy {
    pub guard: GuardPolicy,
    /// Period of the background reconciliation loop.
    pub reconcile_interval: Duration,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            guard: GuardPolicy::default(),
            reconcile_interval: Duration::from_secs(30),
        }
    }
}

/// Everything engines share: remote, cache, ledger, notifier, identity.
#[derive(Clone)]
pub struct SyncContext {
    remote: Arc<dyn RemoteStore>,
    cache: Arc<dyn LocalCache>,
    ledger: Ledger,
    notifier: Arc<dyn Notifier>,
    identity: Option<String>,
    policy: SyncPolicy,
}

impl SyncContext {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        cache: Arc<dyn LocalCache>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let ledger = Ledger::new(cache.clone());
        Self {
            remote,
            cache,
            ledger,
            notifier,
            identity: None,
            policy: SyncPolicy::default(),
        }
    }

    /// HTTP transport + redb cache + log notifier, all from `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let remote = HttpTransport::new(&config.remote, config.backoff())?;
        let cache = RedbCache::open(&config.cache_path()?)?;
        let ctx = Self::new(Arc::new(remote), Arc::new(cache), Arc::new(TracingNotifier))
            .with_policy(SyncPolicy {
                guard: config.guard_policy(),
                reconcile_interval: config.reconcile_interval(),
            });
        Ok(match config.user_id() {
            Some(user) => ctx.with_identity(user),
            None => ctx,
        })
    }

    pub fn with_identity(mut self, user: impl Into<String>) -> Self {
        self.identity = Some(user.into());
        self
    }

    pub fn with_policy(mut self, policy: SyncPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn cache(&self) -> &Arc<dyn LocalCache> {
        &self.cache
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn policy(&self) -> &SyncPolicy {
        &self.policy
    }

    pub fn engine<T: CollectionValue>(&self, spec: CollectionSpec<T>) -> CollectionSyncEngine<T> {
        CollectionSyncEngine::new(self.clone(), spec)
    }
}

/// Handle to one collection's sync state. Cheap to clone; clones share state.
pub struct CollectionSyncEngine<T: CollectionValue> {
    inner: Arc<Inner<T>>,
}

impl<T: CollectionValue> Clone for CollectionSyncEngine<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

struct Inner<T: CollectionValue> {
    spec: CollectionSpec<T>,
    ctx: SyncContext,
    state: watch::Sender<SyncState<T>>,
    write_lock: Arc<tokio::sync::Mutex<()>>,
    /// Local value has changes the remote never acknowledged.
    pending_push: AtomicBool,
    reconciler: Mutex<Option<JoinHandle<()>>>,
    wake: Arc<Notify>,
}

impl<T: CollectionValue> CollectionSyncEngine<T> {
    pub fn new(ctx: SyncContext, spec: CollectionSpec<T>) -> Self {
        if spec.scope == Scope::PerUser && ctx.identity.is_none() {
            tracing::warn!("{} is per-user but no identity is configured", spec.name);
        }
        let (state, _) = watch::channel(SyncState::default());
        Self {
            inner: Arc::new(Inner {
                spec,
                ctx,
                state,
                write_lock: Arc::new(tokio::sync::Mutex::new(())),
                pending_push: AtomicBool::new(false),
                reconciler: Mutex::new(None),
                wake: Arc::new(Notify::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.spec.name
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState<T>> {
        self.inner.state.subscribe()
    }

    pub fn snapshot(&self) -> SyncState<T> {
        self.inner.current()
    }

    pub fn value(&self) -> T {
        self.inner.state.borrow().value.clone()
    }

    /// Initial (or repeated) load from the remote, falling back to the cache.
    pub async fn load(&self) -> SyncState<T> {
        self.inner.load().await;
        self.snapshot()
    }

    /// Validate, guard, and persist `next`.
    ///
    /// `Err` means the write was refused and nothing changed. Remote failures
    /// are not errors: they leave the state in fallback mode instead.
    pub async fn save(&self, next: T) -> Result<SyncState<T>, SyncError> {
        self.inner.save(next).await?;
        Ok(self.snapshot())
    }

    /// Run one reconciliation pass now. `true` once nothing is left to do.
    pub async fn reconcile_now(&self) -> bool {
        self.inner.reconcile_once().await
    }

    /// The host regained visibility; retry a pending reconciliation early.
    pub fn visibility_regained(&self) {
        if self.inner.is_reconciling() {
            self.inner.wake.notify_one();
        }
    }

    /// Wait for any in-flight remote write to finish.
    pub async fn settle(&self) {
        let _guard = self.inner.write_lock.lock().await;
    }

    pub fn is_reconciling(&self) -> bool {
        self.inner.is_reconciling()
    }

    /// Stop background work. Also happens when the last handle is dropped.
    pub fn shutdown(&self) {
        self.inner.stop_reconciler();
    }
}

impl<T: CollectionValue> Inner<T> {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn user(&self) -> Option<&str> {
        match self.spec.scope {
            Scope::PerUser => self.ctx.identity.as_deref(),
            Scope::Shared => None,
        }
    }

    fn cache_key(&self) -> String {
        storage::collection_key(self.name(), self.user())
    }

    fn ledger_key(&self) -> String {
        match self.user() {
            Some(user) => format!("{}:{}", self.name(), user),
            None => self.name().to_string(),
        }
    }

    fn current(&self) -> SyncState<T> {
        self.state.borrow().clone()
    }

    fn publish(&self, update: impl FnOnce(&mut SyncState<T>)) {
        self.state.send_modify(update);
    }

    fn notify(&self, message: &str, is_error: bool) {
        self.ctx.notifier.notify(message, is_error);
    }

    async fn fetch_remote(&self) -> Result<T, TransportError> {
        match self.ctx.remote.fetch(self.name(), self.user()).await? {
            Some(raw) => serde_json::from_value(raw).map_err(|e| TransportError::Decode(e.to_string())),
            None => Ok(T::default()),
        }
    }

    async fn push(&self, value: &T) -> Result<(), TransportError> {
        let json = serde_json::to_value(value).map_err(|e| TransportError::Decode(e.to_string()))?;
        self.ctx.remote.store(self.name(), &json, self.user()).await
    }

    async fn mirror(&self, value: &T) {
        if let Err(e) = storage::save_typed(self.ctx.cache.as_ref(), &self.cache_key(), value).await {
            tracing::warn!("Could not mirror {} to {} cache: {}", self.name(), self.ctx.cache.backend_name(), e);
        }
    }

    async fn read_cache(&self) -> T {
        storage::load_or_default(self.ctx.cache.as_ref(), &self.cache_key()).await
    }

    async fn remember_count(&self, count: usize) {
        if let Err(e) = self.ctx.ledger.record(&self.ledger_key(), count).await {
            tracing::warn!("Could not update last-known-good for {}: {}", self.name(), e);
        }
    }

    /// Adopt a value the remote store vouched for.
    async fn commit_confirmed(&self, value: T, phase: SyncPhase) {
        let count = value.item_count();
        self.mirror(&value).await;
        self.remember_count(count).await;
        self.pending_push.store(false, Ordering::SeqCst);
        self.publish(|s| {
            s.value = value;
            s.loading = false;
            s.has_loaded_once = true;
            s.using_fallback = false;
            s.last_known_count = count;
            s.phase = phase;
        });
    }

    /// Show a value the remote has not confirmed and start reconciling.
    fn enter_fallback(self: &Arc<Self>, value: T, last_known: usize) {
        let count = value.item_count();
        self.publish(|s| {
            s.value = value;
            s.loading = false;
            s.has_loaded_once = true;
            s.using_fallback = true;
            s.last_known_count = count.max(last_known);
            s.phase = SyncPhase::LoadedFallback;
        });
        self.start_reconciler();
    }

    async fn load(self: &Arc<Self>) {
        let _permit = self.write_lock.lock().await;
        self.publish(|s| {
            s.loading = true;
            s.phase = SyncPhase::Loading;
        });

        match self.fetch_remote().await {
            Ok(remote) if remote.item_count() > 0 => {
                tracing::info!("Loaded {} ({} items)", self.name(), remote.item_count());
                self.commit_confirmed(remote, SyncPhase::Loaded).await;
            }
            Ok(empty) => self.load_empty(empty).await,
            Err(e) => {
                tracing::warn!("Could not load {} from remote: {}", self.name(), e);
                let cached = self.read_cache().await;
                if cached.item_count() > 0 {
                    self.notify(
                        &format!("Offline: showing your saved copy of {} ({} items)", self.name(), cached.item_count()),
                        true,
                    );
                    let last_known = self.ctx.ledger.count(&self.ledger_key()).await;
                    self.enter_fallback(cached, last_known);
                } else {
                    // First run without connectivity
                    self.publish(|s| {
                        s.value = T::default();
                        s.loading = false;
                        s.has_loaded_once = true;
                        s.using_fallback = false;
                        s.phase = SyncPhase::Loaded;
                    });
                }
            }
        }
    }

    async fn load_empty(self: &Arc<Self>, empty: T) {
        if let Some(merged) = self.try_migrate().await {
            self.commit_migrated(merged).await;
            return;
        }

        let last_known = self.ctx.ledger.count(&self.ledger_key()).await;
        if last_known == 0 || self.emptied_after_migration(last_known).await {
            self.commit_confirmed(empty, SyncPhase::Loaded).await;
            return;
        }

        let suspicion = SuspiciousEmptyRemote {
            collection: self.name().to_string(),
            last_known,
        };
        tracing::warn!("{}", suspicion);

        let cached = self.read_cache().await;
        if cached.item_count() > 0 {
            self.notify(
                &format!(
                    "{} came back empty from the server; restoring your saved copy ({} items)",
                    self.name(),
                    cached.item_count()
                ),
                true,
            );
            self.enter_fallback(cached, last_known);
        } else {
            tracing::warn!("No cached copy of {} to fall back on", self.name());
            self.publish(|s| {
                s.value = empty;
                s.loading = false;
                s.has_loaded_once = true;
                s.using_fallback = false;
                s.last_known_count = 0;
                s.phase = SyncPhase::Loaded;
            });
        }
    }

    /// A small per-user collection that was filled by the legacy merge may be
    /// emptied elsewhere; restoring it from cache would resurrect the merge.
    async fn emptied_after_migration(&self, last_known: usize) -> bool {
        if self.ctx.policy.guard.protects(last_known) || self.spec.legacy.is_none() {
            return false;
        }
        let Some(user) = self.user() else {
            return false;
        };
        MigrationResolver::new(self.ctx.remote.clone(), self.ctx.cache.clone())
            .is_migrated(self.name(), user)
            .await
    }

    async fn try_migrate(&self) -> Option<T> {
        if self.spec.scope != Scope::PerUser || self.spec.legacy.is_none() {
            return None;
        }
        let user = self.user()?;
        let resolver = MigrationResolver::new(self.ctx.remote.clone(), self.ctx.cache.clone());
        match resolver.run(&self.spec, user).await {
            Ok(merged) => merged,
            Err(e) => {
                tracing::warn!("Migration of {} deferred: {:#}", self.name(), e);
                None
            }
        }
    }

    /// Persist a freshly migrated value. The marker is already set and the
    /// caller holds the write lock.
    async fn commit_migrated(self: &Arc<Self>, merged: T) {
        let count = merged.item_count();
        if count == 0 {
            self.commit_confirmed(merged, SyncPhase::Loaded).await;
            return;
        }

        self.mirror(&merged).await;
        match self.push(&merged).await {
            Ok(()) => {
                self.notify(&format!("Moved {} saved items to your account", count), false);
                self.commit_confirmed(merged, SyncPhase::Loaded).await;
            }
            Err(e) => {
                tracing::warn!("Could not store migrated {}: {}", self.name(), e);
                self.pending_push.store(true, Ordering::SeqCst);
                self.enter_fallback(merged, count);
            }
        }
    }

    async fn save(self: &Arc<Self>, next: T) -> Result<(), SyncError> {
        let permit = self.write_lock.clone().lock_owned().await;
        let current = self.current();
        if !current.has_loaded_once {
            tracing::warn!("Ignoring write to {} before first load", self.name());
            return Err(SyncError::NotLoaded(self.name().to_string()));
        }

        if let Err(e) = self.spec.validate(&next) {
            tracing::warn!("Rejected write to {}: {}", self.name(), e);
            self.notify(&format!("Couldn't save {}: {}", self.name(), e), true);
            return Err(e.into());
        }

        let previous = current.value.item_count().max(current.last_known_count);
        if let Err(rejection) = self.ctx.policy.guard.check(previous, next.item_count()) {
            tracing::warn!("Blocked write to {}: {}", self.name(), rejection);
            self.notify(&format!("Blocked a change to {}: {}", self.name(), rejection), true);
            return Err(rejection.into());
        }

        self.mirror(&next).await;

        match self.spec.mode {
            WriteMode::Verified => self.save_verified(next, current).await,
            WriteMode::BestEffort => self.save_best_effort(next, permit),
        }
        Ok(())
    }

    async fn save_verified(self: &Arc<Self>, next: T, before: SyncState<T>) {
        self.publish(|s| s.phase = SyncPhase::Syncing);

        let outcome = match self.push(&next).await {
            Ok(()) => self.fetch_remote().await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(confirmed) => {
                tracing::info!("Saved {} ({} items, verified)", self.name(), confirmed.item_count());
                let phase = if before.using_fallback {
                    SyncPhase::Reconciled
                } else {
                    SyncPhase::Loaded
                };
                self.commit_confirmed(confirmed, phase).await;
            }
            Err(e) => {
                tracing::warn!("Write to {} failed: {}", self.name(), e);
                self.notify(
                    &format!("Couldn't save {}; keeping the last saved version", self.name()),
                    true,
                );
                self.recover_verified(before).await;
            }
        }
    }

    /// Re-read after a failed verified write. The remote wins unless it came
    /// back empty while we hold data.
    async fn recover_verified(self: &Arc<Self>, before: SyncState<T>) {
        let previous = before.value;
        match self.fetch_remote().await {
            Ok(remote) if remote.item_count() == 0 && previous.item_count() > 0 => {
                tracing::warn!("{} is empty remotely after a failed write; keeping local copy", self.name());
                self.mirror(&previous).await;
                self.enter_fallback(previous, before.last_known_count);
            }
            Ok(remote) => self.commit_confirmed(remote, SyncPhase::Reconciled).await,
            Err(e) => {
                tracing::warn!("Could not re-read {} after failed write: {}", self.name(), e);
                self.mirror(&previous).await;
                self.enter_fallback(previous, before.last_known_count);
            }
        }
    }

    /// Publish `next` now and push it in the background. The push keeps the
    /// write lock until the remote answers.
    fn save_best_effort(self: &Arc<Self>, next: T, permit: OwnedMutexGuard<()>) {
        let count = next.item_count();
        let optimistic = next.clone();
        self.publish(|s| {
            s.value = optimistic;
            s.last_known_count = count;
        });

        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let _permit = permit;
            if let Some(inner) = weak.upgrade() {
                inner.push_best_effort(next).await;
            }
        });
    }

    async fn push_best_effort(self: &Arc<Self>, next: T) {
        let was_fallback = self.current().using_fallback;
        self.publish(|s| s.phase = SyncPhase::Syncing);

        match self.push(&next).await {
            Ok(()) => {
                let count = next.item_count();
                tracing::debug!("Pushed {} ({} items)", self.name(), count);
                self.pending_push.store(false, Ordering::SeqCst);
                self.remember_count(count).await;
                self.publish(|s| {
                    s.value = next;
                    s.last_known_count = count;
                    s.using_fallback = false;
                    s.phase = if was_fallback {
                        SyncPhase::Reconciled
                    } else {
                        SyncPhase::Loaded
                    };
                });
            }
            Err(e) => {
                tracing::warn!("Background write of {} failed: {}", self.name(), e);
                self.pending_push.store(true, Ordering::SeqCst);
                self.notify(
                    &format!("Couldn't sync {}; your changes are saved locally and will retry", self.name()),
                    true,
                );
                self.publish(|s| {
                    s.using_fallback = true;
                    s.phase = SyncPhase::LoadedFallback;
                });
                self.start_reconciler();
            }
        }
    }
}

impl<T: CollectionValue> Drop for Inner<T> {
    fn drop(&mut self) {
        self.stop_reconciler();
    }
}
