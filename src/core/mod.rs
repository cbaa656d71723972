//! Domain atoms shared by every sync component.
//!
//! Layer 0: time (WallClock, TimeSource)
//! Layer 1: identity (EntityClass, RecordId, ClientRequestId, PendingKey)
//! Layer 2: records (Record, RecordIdentity, Filter)
//! Layer 3: events (ChangeEvent, SubscriptionKey, RawChange)

pub mod error;
pub mod event;
pub mod identity;
pub mod record;
pub mod time;

pub use error::{CoreError, InvalidChange, InvalidFilter, InvalidId, InvalidRecord};
pub use event::{ChangeEvent, ChangeKind, RawChange, RawEventType, SubscriptionKey};
pub use identity::{ClientRequestId, EntityClass, PendingKey, RecordId};
pub use record::{Filter, ID_FIELD, Record, RecordIdentity};
pub use time::{ManualTimeSource, SystemTimeSource, TimeSource, WallClock};
