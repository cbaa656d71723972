//! Network reachability flag with change notification.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::sync::observer::{ObserverError, invoke_isolated};

pub type ConnectivityObserver = dyn Fn(bool) -> Result<(), ObserverError> + Send + Sync;

/// Edge-triggered platform signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectivitySignal {
    Reachable,
    Unreachable,
}

impl ConnectivitySignal {
    pub fn is_reachable(self) -> bool {
        matches!(self, ConnectivitySignal::Reachable)
    }
}

/// Platform hook reporting current reachability at startup.
pub trait ReachabilityProbe {
    fn is_reachable(&self) -> bool;
}

#[derive(Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<MonitorInner>,
}

struct MonitorInner {
    online: AtomicBool,
    observers: Mutex<ObserverTable>,
}

#[derive(Default)]
struct ObserverTable {
    next_id: u64,
    entries: BTreeMap<u64, ObserverEntry>,
}

#[derive(Clone)]
struct ObserverEntry {
    callback: Arc<ConnectivityObserver>,
    active: Arc<AtomicBool>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                online: AtomicBool::new(initially_online),
                observers: Mutex::new(ObserverTable::default()),
            }),
        }
    }

    pub fn from_probe(probe: &dyn ReachabilityProbe) -> Self {
        Self::new(probe.is_reachable())
    }

    pub fn status(&self) -> bool {
        self.inner.online.load(Ordering::Acquire)
    }

    pub fn subscribe<F>(&self, observer: F) -> ConnectivitySubscription
    where
        F: Fn(bool) -> Result<(), ObserverError> + Send + Sync + 'static,
    {
        let active = Arc::new(AtomicBool::new(true));
        let entry = ObserverEntry {
            callback: Arc::new(observer),
            active: Arc::clone(&active),
        };
        let id = match self.inner.observers.lock() {
            Ok(mut table) => {
                table.next_id = table.next_id.saturating_add(1);
                let id = table.next_id;
                table.entries.insert(id, entry);
                id
            }
            Err(_) => {
                tracing::warn!("connectivity observer table poisoned; observer not registered");
                active.store(false, Ordering::Release);
                0
            }
        };
        ConnectivitySubscription {
            monitor: Arc::downgrade(&self.inner),
            id,
            active,
        }
    }

    /// Applies a platform signal. Observers run only when the flag flips.
    /// Returns whether it flipped.
    pub fn handle_signal(&self, signal: ConnectivitySignal) -> bool {
        let online = signal.is_reachable();
        let previous = self.inner.online.swap(online, Ordering::AcqRel);
        if previous == online {
            return false;
        }
        tracing::info!(online, "connectivity changed");

        let observers: Vec<(u64, ObserverEntry)> = match self.inner.observers.lock() {
            Ok(table) => table
                .entries
                .iter()
                .map(|(id, entry)| (*id, entry.clone()))
                .collect(),
            Err(_) => {
                tracing::warn!("connectivity observer table poisoned; skipping notification");
                return true;
            }
        };
        for (id, entry) in observers {
            if entry.active.load(Ordering::Acquire) {
                invoke_isolated("connectivity", id, || (entry.callback)(online));
            }
        }
        true
    }

    pub fn observer_count(&self) -> usize {
        self.inner
            .observers
            .lock()
            .map(|table| table.entries.len())
            .unwrap_or(0)
    }
}

/// Detach handle for one connectivity observer.
pub struct ConnectivitySubscription {
    monitor: Weak<MonitorInner>,
    id: u64,
    active: Arc<AtomicBool>,
}

impl ConnectivitySubscription {
    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        let Some(monitor) = self.monitor.upgrade() else {
            return;
        };
        let removed = match monitor.observers.lock() {
            Ok(mut table) => table.entries.remove(&self.id),
            Err(_) => None,
        };
        drop(removed);
    }
}

impl Drop for ConnectivitySubscription {
    fn drop(&mut self) {
        self.detach();
    }
}
