//! Sync service: the single coordination point consumers talk to.
//!
//! Owns the pending ledger and the read cache and holds the subscription
//! registry, connectivity monitor, remote store and time source. Constructed
//! explicitly and shared by `Arc`; nothing here is a process global.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;

use crate::config::SyncConfig;
use crate::core::{
    ChangeEvent, CoreError, EntityClass, Filter, PendingKey, Record, SystemTimeSource, TimeSource,
};
use crate::error::{Effect, Transience};
use crate::sync::cache::{CacheMetrics, ReadCache};
use crate::sync::connectivity::ConnectivityMonitor;
use crate::sync::ledger::{PendingLedger, PendingOp, PendingUpdate};
use crate::sync::observer::ObserverError;
use crate::sync::reconcile::{LocalCollection, MutationOutcome, Reconciliation, reconcile_event};
use crate::sync::registry::{
    RegistryError, Subscription, SubscriptionRegistry, UpstreamTransport,
};
use crate::sync::store::{RemoteStore, Scope, StoreError};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("offline with no fresh cached data for {scope}")]
    Offline { scope: String },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("{what} lock poisoned")]
    LockPoisoned { what: &'static str },
}

impl SyncError {
    pub fn transience(&self) -> Transience {
        match self {
            SyncError::Offline { .. } => Transience::Retryable,
            SyncError::Store(e) => e.transience(),
            SyncError::Registry(e) => e.transience(),
            SyncError::Core(e) => e.transience(),
            SyncError::LockPoisoned { .. } => Transience::Permanent,
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            SyncError::Store(e) => e.effect(),
            SyncError::Offline { .. }
            | SyncError::Registry(_)
            | SyncError::Core(_)
            | SyncError::LockPoisoned { .. } => Effect::None,
        }
    }
}

/// Timing knobs the service runs with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncSettings {
    pub cache_ttl: Duration,
    pub pending_max_age: Duration,
}

impl From<&SyncConfig> for SyncSettings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            cache_ttl: config.cache_ttl(),
            pending_max_age: config.pending_max_age(),
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

/// Counts from one housekeeping pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HousekeepingReport {
    pub pending_evicted: usize,
    pub cache_evicted: usize,
}

pub struct SyncService {
    settings: SyncSettings,
    ledger: Mutex<PendingLedger>,
    cache: Mutex<ReadCache<Vec<Record>>>,
    registry: SubscriptionRegistry,
    connectivity: ConnectivityMonitor,
    store: Arc<dyn RemoteStore>,
}

impl SyncService {
    pub fn new(
        settings: SyncSettings,
        store: Arc<dyn RemoteStore>,
        transport: Arc<dyn UpstreamTransport>,
        connectivity: ConnectivityMonitor,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            settings,
            ledger: Mutex::new(PendingLedger::new(Arc::clone(&clock))),
            cache: Mutex::new(ReadCache::new(settings.cache_ttl, clock)),
            registry: SubscriptionRegistry::new(transport),
            connectivity,
            store,
        }
    }

    pub fn with_system_clock(
        settings: SyncSettings,
        store: Arc<dyn RemoteStore>,
        transport: Arc<dyn UpstreamTransport>,
        connectivity: ConnectivityMonitor,
    ) -> Self {
        Self::new(
            settings,
            store,
            transport,
            connectivity,
            Arc::new(SystemTimeSource),
        )
    }

    pub fn settings(&self) -> SyncSettings {
        self.settings
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    // ---------------------------------------------------------------------
    // Realtime
    // ---------------------------------------------------------------------

    /// Observes writes to `entity` restricted to `owner_filter`.
    pub fn subscribe_to_entity_changes<F>(
        &self,
        entity: EntityClass,
        owner_filter: Option<Filter>,
        observer: F,
    ) -> Result<Subscription, SyncError>
    where
        F: Fn(&ChangeEvent) -> Result<(), ObserverError> + Send + Sync + 'static,
    {
        Ok(self.registry.subscribe(entity, owner_filter, observer)?)
    }

    /// Folds a change event into `collection`: retracts the pending entries it
    /// confirms or supersedes, applies it, and drops cached scopes of its
    /// entity.
    pub fn apply_change(
        &self,
        collection: &mut LocalCollection,
        event: &ChangeEvent,
    ) -> Result<Reconciliation, SyncError> {
        let mut ledger = self.lock_ledger()?;
        let outcome = reconcile_event(&mut ledger, event);
        drop(ledger);
        collection.apply_event(event);
        self.invalidate_entity(&event.entity)?;
        Ok(outcome)
    }

    // ---------------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------------

    /// Fresh cached rows for `scope`, else a fetch (online only), with pending
    /// updates overlaid.
    pub fn load(&self, scope: &Scope) -> Result<Vec<Record>, SyncError> {
        let key = scope.cache_key();
        let cached = self.lock_cache()?.get(&key);
        let base = match cached {
            Some(records) => records,
            None => self.fetch_into_cache(scope, key)?,
        };
        self.project(&base, &scope.entity)
    }

    /// Bypasses the cache when online; falls back to `load` offline.
    pub fn refresh(&self, scope: &Scope) -> Result<Vec<Record>, SyncError> {
        if !self.connectivity.status() {
            return self.load(scope);
        }
        let base = self.fetch_into_cache(scope, scope.cache_key())?;
        self.project(&base, &scope.entity)
    }

    fn fetch_into_cache(&self, scope: &Scope, key: String) -> Result<Vec<Record>, SyncError> {
        if !self.connectivity.status() {
            return Err(SyncError::Offline {
                scope: scope.to_string(),
            });
        }
        // Change events may be applied while the fetch is in flight.
        let prefix = Scope::entity_prefix(&scope.entity);
        let epoch = self.lock_cache()?.epoch(&prefix);
        let records = self.store.fetch(scope)?;
        let cached = self
            .lock_cache()?
            .set_if_current(key, records.clone(), &prefix, epoch);
        tracing::debug!(scope = %scope, rows = records.len(), cached, "scope fetched");
        Ok(records)
    }

    /// What a consumer should display for `collection`.
    pub fn view(&self, collection: &LocalCollection) -> Result<Vec<Record>, SyncError> {
        self.project(collection.records(), collection.entity())
    }

    // ---------------------------------------------------------------------
    // Writes
    // ---------------------------------------------------------------------

    /// Runs one user mutation against `collection` end to end.
    ///
    /// Store failures do not surface as `Err`: they come back as
    /// [`MutationOutcome::RolledBack`] with the collection already restored.
    pub fn mutate(
        &self,
        collection: &mut LocalCollection,
        op: PendingOp,
    ) -> Result<MutationOutcome, SyncError> {
        let entity = collection.entity().clone();
        let update = PendingUpdate::new(entity.clone(), op.clone());
        let key = update.default_key()?;
        let request = update.request;
        let before = collection.snapshot();

        self.lock_ledger()?.put(key.clone(), update);
        collection.apply_pending(&op);

        let written = match &op {
            PendingOp::Add { record } => self.store.insert(&entity, record, request).map(Some),
            PendingOp::Update { target, fields } => self
                .store
                .update(&entity, target, fields, request)
                .map(Some),
            PendingOp::Delete { target } => {
                self.store.delete(&entity, target, request).map(|()| None)
            }
        };

        // A change event may already have retracted the entry.
        self.lock_ledger()?.remove(&key);

        match written {
            Ok(record) => {
                collection.accept_confirmed(&op, record.clone());
                self.invalidate_entity(&entity)?;
                tracing::debug!(key = %key, request = %request, "mutation confirmed");
                Ok(MutationOutcome::Confirmed { key, record })
            }
            Err(error) => {
                tracing::warn!(key = %key, request = %request, error = %error, "mutation rolled back");
                collection.restore(before.clone());
                Ok(MutationOutcome::RolledBack {
                    key,
                    restore: before,
                    error,
                })
            }
        }
    }

    // ---------------------------------------------------------------------
    // Ledger and cache access
    // ---------------------------------------------------------------------

    pub fn pending_put(
        &self,
        key: PendingKey,
        update: PendingUpdate,
    ) -> Result<Option<PendingUpdate>, SyncError> {
        Ok(self.lock_ledger()?.put(key, update))
    }

    pub fn pending_remove(&self, key: &PendingKey) -> Result<Option<PendingUpdate>, SyncError> {
        Ok(self.lock_ledger()?.remove(key))
    }

    pub fn pending_get(&self, key: &PendingKey) -> Result<Option<PendingUpdate>, SyncError> {
        Ok(self.lock_ledger()?.get(key).cloned())
    }

    pub fn pending_len(&self) -> Result<usize, SyncError> {
        Ok(self.lock_ledger()?.len())
    }

    pub fn project(&self, base: &[Record], entity: &EntityClass) -> Result<Vec<Record>, SyncError> {
        Ok(self.lock_ledger()?.project(base, entity))
    }

    pub fn cache_get(&self, key: &str) -> Result<Option<Vec<Record>>, SyncError> {
        Ok(self.lock_cache()?.get(key))
    }

    pub fn cache_set(&self, key: impl Into<String>, records: Vec<Record>) -> Result<(), SyncError> {
        self.lock_cache()?.set(key, records);
        Ok(())
    }

    pub fn cache_clear(&self) -> Result<(), SyncError> {
        self.lock_cache()?.clear();
        Ok(())
    }

    pub fn cache_metrics(&self) -> Result<CacheMetrics, SyncError> {
        Ok(self.lock_cache()?.metrics())
    }

    /// One periodic pass: stale pending updates and expired cache entries.
    pub fn housekeep(&self) -> Result<HousekeepingReport, SyncError> {
        let evicted = self.lock_ledger()?.sweep(self.settings.pending_max_age);
        for key in &evicted {
            tracing::warn!(key = %key, "pending update expired without confirmation");
        }
        let cache_evicted = self.lock_cache()?.sweep();
        Ok(HousekeepingReport {
            pending_evicted: evicted.len(),
            cache_evicted,
        })
    }

    fn invalidate_entity(&self, entity: &EntityClass) -> Result<(), SyncError> {
        let dropped = self
            .lock_cache()?
            .invalidate_prefix(&Scope::entity_prefix(entity));
        if dropped > 0 {
            tracing::debug!(entity = %entity, dropped, "cached scopes invalidated");
        }
        Ok(())
    }

    fn lock_ledger(&self) -> Result<MutexGuard<'_, PendingLedger>, SyncError> {
        self.ledger
            .lock()
            .map_err(|_| SyncError::LockPoisoned { what: "pending ledger" })
    }

    fn lock_cache(&self) -> Result<MutexGuard<'_, ReadCache<Vec<Record>>>, SyncError> {
        self.cache
            .lock()
            .map_err(|_| SyncError::LockPoisoned { what: "read cache" })
    }
}
