//! Time primitives
//!
//! WallClock measures TTL and staleness. Reconciliation also compares a
//! store-reported commit time against the local creation time of a pending
//! update; the two come from different clocks, so that ordering is only as
//! good as the client/server skew, and writes within the skew may be ordered
//! either way. Every age computation in the crate reads time through an
//! injected `TimeSource` so expiry boundaries are testable.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WallClock(pub u64);

impl WallClock {
    pub fn now() -> Self {
        let ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self(ms)
    }

    pub fn as_millis(self) -> u64 {
        self.0
    }

    /// Time elapsed from `earlier` to `self`; zero if `earlier` is in the future.
    pub fn since(self, earlier: WallClock) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

pub trait TimeSource: Send + Sync {
    fn now(&self) -> WallClock;
}

/// Process wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> WallClock {
        WallClock::now()
    }
}

/// Clock that only moves when told to. Clones share the same instant.
#[derive(Clone, Debug, Default)]
pub struct ManualTimeSource {
    now_ms: Arc<AtomicU64>,
}

impl ManualTimeSource {
    pub fn new(start: WallClock) -> Self {
        Self {
            now_ms: Arc::new(AtomicU64::new(start.0)),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now_ms
            .fetch_add(by.as_millis() as u64, Ordering::AcqRel);
    }

    pub fn set(&self, at: WallClock) {
        self.now_ms.store(at.0, Ordering::Release);
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> WallClock {
        WallClock(self.now_ms.load(Ordering::Acquire))
    }
}
