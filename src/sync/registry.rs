//! Subscription registry: one upstream channel per key, fanned out to many
//! local observers.
//!
//! Invariant: a key has an open upstream channel iff its observer set is
//! non-empty. The last detach closes the channel and forgets the key before
//! returning.
//!
//! Channel establishment is serialized per key: concurrent first subscribers
//! of one key wait for the single open in flight, while other keys proceed.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};

use thiserror::Error;

use crate::core::{ChangeEvent, EntityClass, Filter, RawChange, SubscriptionKey};
use crate::error::{Effect, Transience};
use crate::sync::observer::{ObserverError, invoke_isolated};

/// Callback registered against a subscription key.
pub type ChangeObserver = dyn Fn(&ChangeEvent) -> Result<(), ObserverError> + Send + Sync;

/// Push transport able to open one channel per subscription key.
pub trait UpstreamTransport: Send + Sync {
    /// Opens the upstream channel for `key`. Events for the channel must be
    /// handed to `sink`, in the order the transport receives them.
    fn open(
        &self,
        key: &SubscriptionKey,
        sink: EventSink,
    ) -> Result<Box<dyn UpstreamChannel>, TransportError>;
}

/// An open upstream channel.
pub trait UpstreamChannel: Send {
    fn close(self: Box<Self>);
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("upstream unreachable: {reason}")]
    Unreachable { reason: String },
    #[error("upstream rejected subscription: {reason}")]
    Rejected { reason: String },
}

impl TransportError {
    pub fn transience(&self) -> Transience {
        match self {
            TransportError::Unreachable { .. } => Transience::Retryable,
            TransportError::Rejected { .. } => Transience::Permanent,
        }
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to establish upstream subscription for {key}: {source}")]
    Establish {
        key: SubscriptionKey,
        #[source]
        source: TransportError,
    },
    #[error("subscription registry lock poisoned")]
    LockPoisoned,
}

impl RegistryError {
    pub fn transience(&self) -> Transience {
        match self {
            RegistryError::Establish { source, .. } => source.transience(),
            RegistryError::LockPoisoned => Transience::Permanent,
        }
    }

    pub fn effect(&self) -> Effect {
        Effect::None
    }
}

#[derive(Clone)]
pub struct SubscriptionRegistry {
    inner: Arc<RegistryInner>,
}

impl SubscriptionRegistry {
    pub fn new(transport: Arc<dyn UpstreamTransport>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                transport,
                state: Mutex::new(RegistryState::default()),
                established: Condvar::new(),
            }),
        }
    }

    /// Registers `observer` for changes to `entity` matching `filter`,
    /// opening the upstream channel if this is the key's first observer.
    ///
    /// The returned handle detaches exactly this observer when unsubscribed
    /// or dropped.
    pub fn subscribe<F>(
        &self,
        entity: EntityClass,
        filter: Option<Filter>,
        observer: F,
    ) -> Result<Subscription, RegistryError>
    where
        F: Fn(&ChangeEvent) -> Result<(), ObserverError> + Send + Sync + 'static,
    {
        let key = SubscriptionKey::new(entity, filter);
        let slot = ObserverSlot {
            callback: Arc::new(observer),
            active: Arc::new(AtomicBool::new(true)),
        };

        let generation = {
            let mut state = self.inner.lock_state()?;
            loop {
                if state.channels.contains_key(&key) {
                    let observer_id = state.attach(&key, slot.clone());
                    tracing::debug!(key = %key, observer_id, "observer attached to open channel");
                    return Ok(self.handle(key, observer_id, slot));
                }
                if !state.establishing.contains(&key) {
                    break;
                }
                state = self
                    .inner
                    .established
                    .wait(state)
                    .map_err(|_| RegistryError::LockPoisoned)?;
            }
            state.establishing.insert(key.clone());
            state.next_generation = state.next_generation.saturating_add(1);
            state.next_generation
        };
        let _establishing = Establishing {
            inner: &self.inner,
            key: key.clone(),
        };

        let sink = EventSink {
            registry: Arc::downgrade(&self.inner),
            key: key.clone(),
            generation,
        };
        let upstream = self
            .inner
            .transport
            .open(&key, sink)
            .map_err(|source| {
                tracing::warn!(key = %key, error = %source, "upstream subscription failed");
                RegistryError::Establish {
                    key: key.clone(),
                    source,
                }
            })?;

        let mut state = self.inner.lock_state()?;
        state.channels.insert(
            key.clone(),
            ChannelState {
                generation,
                upstream: Some(upstream),
                observers: BTreeMap::new(),
            },
        );
        let observer_id = state.attach(&key, slot.clone());
        tracing::debug!(key = %key, observer_id, generation, "upstream channel opened");
        Ok(self.handle(key, observer_id, slot))
    }

    /// Number of open upstream channels.
    pub fn channel_count(&self) -> Result<usize, RegistryError> {
        Ok(self.inner.lock_state()?.channels.len())
    }

    /// Number of observers attached to `key`; zero for unknown keys.
    pub fn observer_count(&self, key: &SubscriptionKey) -> Result<usize, RegistryError> {
        Ok(self
            .inner
            .lock_state()?
            .channels
            .get(key)
            .map_or(0, |channel| channel.observers.len()))
    }

    pub fn keys(&self) -> Result<Vec<SubscriptionKey>, RegistryError> {
        let mut keys: Vec<_> = self.inner.lock_state()?.channels.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    fn handle(&self, key: SubscriptionKey, observer_id: u64, slot: ObserverSlot) -> Subscription {
        Subscription {
            registry: Arc::downgrade(&self.inner),
            key,
            observer_id,
            active: slot.active,
        }
    }
}

struct RegistryInner {
    transport: Arc<dyn UpstreamTransport>,
    state: Mutex<RegistryState>,
    /// Signalled whenever a key leaves `RegistryState::establishing`.
    established: Condvar,
}

impl RegistryInner {
    fn lock_state(&self) -> Result<MutexGuard<'_, RegistryState>, RegistryError> {
        self.state.lock().map_err(|_| RegistryError::LockPoisoned)
    }

    /// Observers of `key` at the moment of the call, if `generation` is still
    /// the key's live channel.
    fn snapshot(&self, key: &SubscriptionKey, generation: u64) -> Vec<(u64, ObserverSlot)> {
        let Ok(state) = self.lock_state() else {
            tracing::warn!(key = %key, "registry lock poisoned; dropping event");
            return Vec::new();
        };
        match state.channels.get(key) {
            Some(channel) if channel.generation == generation => channel
                .observers
                .iter()
                .map(|(id, slot)| (*id, slot.clone()))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Removes one observer. Returns its slot (dropped by the caller outside
    /// the lock) and, when it was the last one, the upstream channel to close.
    fn detach(
        &self,
        key: &SubscriptionKey,
        observer_id: u64,
    ) -> (Option<ObserverSlot>, Option<Box<dyn UpstreamChannel>>) {
        let Ok(mut state) = self.lock_state() else {
            tracing::warn!(key = %key, observer_id, "registry lock poisoned; detach skipped");
            return (None, None);
        };
        let Some(channel) = state.channels.get_mut(key) else {
            return (None, None);
        };
        let removed = channel.observers.remove(&observer_id);
        if !channel.observers.is_empty() {
            return (removed, None);
        }
        let upstream = state
            .channels
            .remove(key)
            .and_then(|mut channel| channel.upstream.take());
        (removed, upstream)
    }
}

impl Drop for RegistryInner {
    fn drop(&mut self) {
        let Ok(state) = self.state.get_mut() else {
            return;
        };
        for (key, mut channel) in state.channels.drain() {
            if let Some(upstream) = channel.upstream.take() {
                tracing::debug!(key = %key, "closing upstream channel on registry drop");
                upstream.close();
            }
        }
    }
}

#[derive(Default)]
struct RegistryState {
    next_generation: u64,
    next_observer_id: u64,
    channels: HashMap<SubscriptionKey, ChannelState>,
    /// Keys whose upstream open is in flight.
    establishing: HashSet<SubscriptionKey>,
}

/// Marks a key as being established until dropped, on every exit path.
struct Establishing<'a> {
    inner: &'a RegistryInner,
    key: SubscriptionKey,
}

impl Drop for Establishing<'_> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.inner.state.lock() {
            state.establishing.remove(&self.key);
        }
        self.inner.established.notify_all();
    }
}

impl RegistryState {
    fn attach(&mut self, key: &SubscriptionKey, slot: ObserverSlot) -> u64 {
        self.next_observer_id = self.next_observer_id.saturating_add(1);
        let id = self.next_observer_id;
        if let Some(channel) = self.channels.get_mut(key) {
            channel.observers.insert(id, slot);
        }
        id
    }
}

struct ChannelState {
    generation: u64,
    upstream: Option<Box<dyn UpstreamChannel>>,
    observers: BTreeMap<u64, ObserverSlot>,
}

#[derive(Clone)]
struct ObserverSlot {
    callback: Arc<ChangeObserver>,
    active: Arc<AtomicBool>,
}

/// Delivery handle given to the transport for one opened channel.
///
/// A sink outlives nothing: once its channel is torn down (or the registry is
/// dropped) deliveries through it reach no observer.
#[derive(Clone)]
pub struct EventSink {
    registry: Weak<RegistryInner>,
    key: SubscriptionKey,
    generation: u64,
}

impl EventSink {
    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    /// Fans `event` out to every attached observer. Returns how many
    /// observers handled it without error.
    pub fn deliver(&self, event: ChangeEvent) -> usize {
        let Some(registry) = self.registry.upgrade() else {
            return 0;
        };
        if !self.key.admits(&event) {
            tracing::warn!(
                key = %self.key,
                entity = %event.entity,
                kind = event.kind.as_str(),
                "dropping event outside subscription key"
            );
            return 0;
        }

        let scope = self.key.to_string();
        let mut handled = 0;
        for (observer_id, slot) in registry.snapshot(&self.key, self.generation) {
            // Checked per observer so a detach during this fan-out takes
            // effect for the rest of it.
            if !slot.active.load(Ordering::Acquire) {
                continue;
            }
            if invoke_isolated(&scope, observer_id, || (slot.callback)(&event)) {
                handled += 1;
            }
        }
        handled
    }

    /// Validates a wire-shaped notification and delivers it. Malformed
    /// notifications are logged and dropped.
    pub fn deliver_raw(&self, raw: RawChange) -> usize {
        match ChangeEvent::try_from(raw) {
            Ok(event) => self.deliver(event),
            Err(err) => {
                tracing::warn!(key = %self.key, error = %err, "dropping malformed change event");
                0
            }
        }
    }
}

/// Detach handle for one observer.
pub struct Subscription {
    registry: Weak<RegistryInner>,
    key: SubscriptionKey,
    observer_id: u64,
    active: Arc<AtomicBool>,
}

impl Subscription {
    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let (removed, upstream) = registry.detach(&self.key, self.observer_id);
        // The observer closure may own other subscriptions; release it
        // outside the registry lock.
        drop(removed);
        if let Some(upstream) = upstream {
            tracing::debug!(key = %self.key, "last observer detached; closing upstream channel");
            upstream.close();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("observer_id", &self.observer_id)
            .field("active", &self.is_active())
            .finish()
    }
}
