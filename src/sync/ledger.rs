//! Pending-update ledger: optimistic mutations awaiting confirmation.
//!
//! The ledger owns every pending update exclusively. One entry per key; a
//! later `put` under the same key replaces the earlier entry and moves it to
//! the end of iteration order.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;

use crate::core::{
    ChangeEvent, ClientRequestId, CoreError, EntityClass, PendingKey, Record, RecordIdentity,
    TimeSource, WallClock,
};

#[derive(Clone, Debug, PartialEq)]
pub enum PendingOp {
    /// Append a record not yet known to the server.
    Add { record: Record },
    /// Field-level patch of the record matching `target`.
    Update {
        target: RecordIdentity,
        fields: Record,
    },
    /// Removal of the record matching `target`.
    Delete { target: RecordIdentity },
}

impl PendingOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            PendingOp::Add { .. } => "add",
            PendingOp::Update { .. } => "update",
            PendingOp::Delete { .. } => "delete",
        }
    }

    /// Identity of the record this op affects.
    pub fn target(&self) -> Option<RecordIdentity> {
        match self {
            PendingOp::Add { record } => record.identity(),
            PendingOp::Update { target, .. } | PendingOp::Delete { target } => {
                Some(target.clone())
            }
        }
    }
}

impl fmt::Display for PendingOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PendingUpdate {
    pub entity: EntityClass,
    pub op: PendingOp,
    pub request: ClientRequestId,
    /// Set by the ledger when the update is stored.
    pub created_at: WallClock,
}

impl PendingUpdate {
    pub fn new(entity: EntityClass, op: PendingOp) -> Self {
        Self::with_request(entity, op, ClientRequestId::generate())
    }

    pub fn with_request(entity: EntityClass, op: PendingOp, request: ClientRequestId) -> Self {
        Self {
            entity,
            op,
            request,
            created_at: WallClock(0),
        }
    }

    /// Conventional key: `entity:operation:target`.
    pub fn default_key(&self) -> Result<PendingKey, CoreError> {
        let target = match self.op.target() {
            Some(identity) => identity.to_string(),
            None => self.request.to_string(),
        };
        PendingKey::new(format!("{}:{}:{}", self.entity, self.op, target))
    }

    pub fn age(&self, now: WallClock) -> Duration {
        now.since(self.created_at)
    }

    pub fn targets(&self, entity: &EntityClass, identity: &RecordIdentity) -> bool {
        &self.entity == entity
            && self
                .op
                .target()
                .is_some_and(|target| target.is_within(identity))
    }

    pub fn is_affected_by(&self, event: &ChangeEvent) -> bool {
        self.entity == event.entity
            && self
                .op
                .target()
                .is_some_and(|target| event.affects(&target))
    }
}

pub struct PendingLedger {
    clock: Arc<dyn TimeSource>,
    entries: IndexMap<PendingKey, PendingUpdate>,
}

impl PendingLedger {
    pub fn new(clock: Arc<dyn TimeSource>) -> Self {
        Self {
            clock,
            entries: IndexMap::new(),
        }
    }

    /// Stamps `update` with the current time and stores it. Returns the entry
    /// it replaced, if any.
    pub fn put(&mut self, key: PendingKey, mut update: PendingUpdate) -> Option<PendingUpdate> {
        update.created_at = self.clock.now();
        let replaced = self.entries.shift_remove(&key);
        tracing::debug!(
            key = %key,
            entity = %update.entity,
            op = update.op.as_str(),
            replaced = replaced.is_some(),
            "pending update recorded"
        );
        self.entries.insert(key, update);
        replaced
    }

    pub fn remove(&mut self, key: &PendingKey) -> Option<PendingUpdate> {
        self.entries.shift_remove(key)
    }

    pub fn get(&self, key: &PendingKey) -> Option<&PendingUpdate> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PendingKey, &PendingUpdate)> {
        self.entries.iter()
    }

    /// Drops every entry older than `max_age` and returns their keys.
    pub fn sweep(&mut self, max_age: Duration) -> Vec<PendingKey> {
        let now = self.clock.now();
        let mut evicted = Vec::new();
        self.entries.retain(|key, update| {
            let keep = update.age(now) <= max_age;
            if !keep {
                evicted.push(key.clone());
            }
            keep
        });
        if !evicted.is_empty() {
            tracing::debug!(
                evicted = evicted.len(),
                max_age_ms = max_age.as_millis() as u64,
                "stale pending updates swept"
            );
        }
        evicted
    }

    /// Overlays every pending update for `entity` onto `base`, in ledger
    /// order. `base` is never modified.
    pub fn project(&self, base: &[Record], entity: &EntityClass) -> Vec<Record> {
        let mut view = base.to_vec();
        for update in self.entries.values().filter(|u| &u.entity == entity) {
            apply_op(&mut view, &update.op);
        }
        view
    }

    /// Keys of pending updates targeting `identity`, oldest first.
    pub fn keys_for_record(
        &self,
        entity: &EntityClass,
        identity: &RecordIdentity,
    ) -> Vec<PendingKey> {
        self.entries
            .iter()
            .filter(|(_, update)| update.targets(entity, identity))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Keys of pending updates whose record `event` touches, oldest first.
    pub fn keys_for_event(&self, event: &ChangeEvent) -> Vec<PendingKey> {
        self.entries
            .iter()
            .filter(|(_, update)| update.is_affected_by(event))
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn key_for_request(&self, request: ClientRequestId) -> Option<PendingKey> {
        self.entries
            .iter()
            .find(|(_, update)| update.request == request)
            .map(|(key, _)| key.clone())
    }
}

impl fmt::Debug for PendingLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingLedger")
            .field("entries", &self.entries)
            .finish()
    }
}

/// Applies one op to a collection in place.
pub(crate) fn apply_op(records: &mut Vec<Record>, op: &PendingOp) {
    match op {
        PendingOp::Add { record } => records.push(record.clone()),
        PendingOp::Update { target, fields } => {
            if let Some(existing) = records.iter_mut().find(|r| r.matches(target)) {
                *existing = existing.merged_with(fields);
            }
        }
        PendingOp::Delete { target } => {
            if let Some(pos) = records.iter().position(|r| r.matches(target)) {
                records.remove(pos);
            }
        }
    }
}
