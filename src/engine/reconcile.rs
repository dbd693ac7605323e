//! Background reconciliation while a collection is in fallback mode.
//!
//! Retries on a fixed interval and whenever the host regains visibility.
//! Each pass holds the collection's write lock. The loop ends itself after
//! the first pass that finds nothing left to reconcile.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::time::MissedTickBehavior;

use super::{Inner, SyncPhase};
use crate::collections::CollectionValue;

impl<T: CollectionValue> Inner<T> {
    pub(super) fn start_reconciler(self: &Arc<Self>) {
        let mut slot = match self.reconciler.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let weak = Arc::downgrade(self);
        let wake = self.wake.clone();
        let period = self.ctx.policy.reconcile_interval;
        let name = self.spec.name.clone();
        tracing::info!("Reconciling {} in the background every {}s", name, period.as_secs());

        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = wake.notified() => {
                        tracing::debug!("Visibility regained, reconciling {} early", name);
                    }
                }
                let Some(inner) = weak.upgrade() else { break };
                if inner.reconcile_once().await {
                    break;
                }
            }
            tracing::debug!("Reconciliation loop for {} stopped", name);
        }));
    }

    pub(super) fn stop_reconciler(&self) {
        let handle = match self.reconciler.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    pub(super) fn is_reconciling(&self) -> bool {
        match self.reconciler.lock() {
            Ok(slot) => slot.as_ref().is_some_and(|handle| !handle.is_finished()),
            Err(_) => false,
        }
    }

    /// One reconciliation pass. Returns `true` when the collection no longer
    /// needs reconciling.
    pub(super) async fn reconcile_once(self: &Arc<Self>) -> bool {
        let _guard = self.write_lock.lock().await;
        let state = self.current();
        let pending = self.pending_push.load(Ordering::SeqCst);
        if !state.using_fallback && !pending {
            return true;
        }

        let remote = match self.fetch_remote().await {
            Ok(remote) => remote,
            Err(e) => {
                tracing::debug!("{} still unreachable: {}", self.name(), e);
                return false;
            }
        };

        let local = state.value;
        let local_count = local.item_count();

        if !pending && (remote.item_count() > 0 || local_count == 0) {
            let count = remote.item_count();
            tracing::info!("Reconciled {}: remote has {} items", self.name(), count);
            self.commit_confirmed(remote, SyncPhase::Reconciled).await;
            self.notify(&format!("{} is back in sync ({} items)", self.name(), count), false);
            return true;
        }

        // Remote is missing our data: push it, then confirm by reading back
        if let Err(e) = self.push(&local).await {
            tracing::warn!("Could not push {} during reconciliation: {}", self.name(), e);
            return false;
        }
        match self.fetch_remote().await {
            Ok(confirmed) if confirmed.item_count() == local_count => {
                tracing::info!("Reconciled {}: restored {} local items", self.name(), local_count);
                self.commit_confirmed(confirmed, SyncPhase::Reconciled).await;
                self.notify(&format!("{} synced ({} items)", self.name(), local_count), false);
                true
            }
            Ok(confirmed) => {
                tracing::warn!(
                    "Read-back of {} returned {} items, expected {}",
                    self.name(),
                    confirmed.item_count(),
                    local_count
                );
                false
            }
            Err(e) => {
                tracing::warn!("Could not confirm {} after push: {}", self.name(), e);
                false
            }
        }
    }
}
