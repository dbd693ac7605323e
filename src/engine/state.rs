/// Where a collection is in its sync lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Initial remote read in progress.
    Loading,
    /// Value came from the remote store.
    Loaded,
    /// Value came from the local cache; background reconciliation running.
    LoadedFallback,
    /// A write is talking to the remote store.
    Syncing,
    /// Fallback or failed write resolved against the remote store.
    Reconciled,
}

/// Observable state of one collection for the lifetime of a UI surface.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncState<T> {
    pub value: T,
    pub loading: bool,
    /// Gates writes: nothing may be saved before the first load finished.
    pub has_loaded_once: bool,
    /// `value` is the cached copy, not confirmed by the remote store.
    pub using_fallback: bool,
    pub last_known_count: usize,
    pub phase: SyncPhase,
}

impl<T: Default> Default for SyncState<T> {
    fn default() -> Self {
        Self {
            value: T::default(),
            loading: true,
            has_loaded_once: false,
            using_fallback: false,
            last_known_count: 0,
            phase: SyncPhase::Loading,
        }
    }
}

impl<T> SyncState<T> {
    pub fn is_ready(&self) -> bool {
        self.has_loaded_once && !self.loading
    }
}
