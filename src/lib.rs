#![forbid(unsafe_code)]

pub mod config;
pub mod core;
pub mod error;
mod paths;
pub mod sync;
pub mod telemetry;

pub use error::{Effect, Error, Transience};
pub type Result<T> = std::result::Result<T, Error>;

// Re-export the types most callers touch at crate root
pub use crate::core::{
    ChangeEvent, ChangeKind, ClientRequestId, EntityClass, Filter, ManualTimeSource, PendingKey,
    RawChange, Record, RecordId, RecordIdentity, SubscriptionKey, SystemTimeSource, TimeSource,
    WallClock,
};
pub use crate::sync::{
    ConnectivityMonitor, HousekeepingHandle, LocalCollection, MutationOutcome, PendingOp,
    PendingUpdate, RemoteStore, Scope, Subscription, SyncService, SyncSettings,
    UpstreamTransport,
};
