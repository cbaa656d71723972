//! Client-side synchronization: pending ledger, read cache, connectivity,
//! realtime fan-out, and the reconciliation that ties them together.

pub mod cache;
pub mod connectivity;
pub mod housekeeping;
pub mod ledger;
pub mod observer;
pub mod reconcile;
pub mod registry;
pub mod service;
pub mod store;

pub use cache::{CacheMetrics, DEFAULT_CACHE_TTL, ReadCache};
pub use connectivity::{
    ConnectivityMonitor, ConnectivityObserver, ConnectivitySignal, ConnectivitySubscription,
    ReachabilityProbe,
};
pub use housekeeping::HousekeepingHandle;
pub use ledger::{PendingLedger, PendingOp, PendingUpdate};
pub use observer::ObserverError;
pub use reconcile::{LocalCollection, MutationOutcome, Reconciliation, reconcile_event};
pub use registry::{
    ChangeObserver, EventSink, RegistryError, Subscription, SubscriptionRegistry, TransportError,
    UpstreamChannel, UpstreamTransport,
};
pub use service::{HousekeepingReport, SyncError, SyncService, SyncSettings};
pub use store::{RemoteStore, Scope, StoreError};
