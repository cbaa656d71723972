//! Reconciliation of optimistic state with confirmations and change events.
//!
//! A mutation moves through: pending entry recorded, optimistic preview
//! applied, remote write, then either confirmation (entry retracted, server
//! row replaces the placeholder) or rollback (entry retracted, collection
//! restored to its exact pre-mutation shape).
//!
//! Change events retract pending entries by request tag first, then by
//! record identity and commit time; see [`reconcile_event`].

use crate::core::{ChangeEvent, ChangeKind, EntityClass, PendingKey, Record, RecordIdentity};
use crate::sync::ledger::{PendingLedger, PendingOp, apply_op};
use crate::sync::store::StoreError;

/// Records of one entity class as held by a consumer.
#[derive(Clone, Debug, PartialEq)]
pub struct LocalCollection {
    entity: EntityClass,
    records: Vec<Record>,
}

impl LocalCollection {
    pub fn new(entity: EntityClass, records: Vec<Record>) -> Self {
        Self { entity, records }
    }

    pub fn empty(entity: EntityClass) -> Self {
        Self::new(entity, Vec::new())
    }

    pub fn entity(&self) -> &EntityClass {
        &self.entity
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn replace_all(&mut self, records: Vec<Record>) {
        self.records = records;
    }

    pub fn snapshot(&self) -> Vec<Record> {
        self.records.clone()
    }

    pub fn restore(&mut self, snapshot: Vec<Record>) {
        self.records = snapshot;
    }

    /// Optimistic preview of a pending op.
    pub fn apply_pending(&mut self, op: &PendingOp) {
        apply_op(&mut self.records, op);
    }

    /// Replaces the optimistic copy produced by `op` with the server's row.
    ///
    /// Any copy of the confirmed row that already arrived through a change
    /// event is folded in, so the record appears exactly once.
    pub fn accept_confirmed(&mut self, op: &PendingOp, confirmed: Option<Record>) {
        let position = op
            .target()
            .and_then(|target| self.records.iter().position(|r| r.matches(&target)));
        if let Some(pos) = position {
            self.records.remove(pos);
        }
        let Some(record) = confirmed else {
            return;
        };
        let mut at = position.unwrap_or(self.records.len());
        if let Some(identity) = record.identity() {
            let mut idx = 0;
            self.records.retain(|r| {
                let keep = !r.matches(&identity);
                if !keep && idx < at {
                    at -= 1;
                }
                idx += 1;
                keep
            });
        }
        let at = at.min(self.records.len());
        self.records.insert(at, record);
    }

    /// Applies an upstream change. Inserts upsert by id so an echo of a row
    /// already present never duplicates it.
    pub fn apply_event(&mut self, event: &ChangeEvent) {
        if event.entity != self.entity {
            return;
        }
        match &event.kind {
            ChangeKind::Insert { new } => self.upsert(new.clone(), new.identity()),
            ChangeKind::Update { new, old } => {
                let identity = new.identity().or_else(|| old.clone());
                self.upsert(new.clone(), identity);
            }
            ChangeKind::Delete { old } => self.records.retain(|r| !r.matches(old)),
        }
    }

    fn upsert(&mut self, record: Record, identity: Option<RecordIdentity>) {
        let existing = identity
            .as_ref()
            .and_then(|identity| self.records.iter().position(|r| r.matches(identity)));
        match existing {
            Some(pos) => self.records[pos] = record,
            None => self.records.push(record),
        }
    }
}

/// Result of a wrapped mutation: either the server-confirmed row, or the
/// instruction to roll the local collection back.
#[derive(Clone, Debug, PartialEq)]
pub enum MutationOutcome {
    Confirmed {
        key: PendingKey,
        /// Stored row; `None` for deletes.
        record: Option<Record>,
    },
    RolledBack {
        key: PendingKey,
        /// Exact pre-mutation contents of the collection.
        restore: Vec<Record>,
        error: StoreError,
    },
}

impl MutationOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, MutationOutcome::Confirmed { .. })
    }

    pub fn key(&self) -> &PendingKey {
        match self {
            MutationOutcome::Confirmed { key, .. } | MutationOutcome::RolledBack { key, .. } => key,
        }
    }
}

/// What a change event did to the ledger.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Entries removed because the event confirms or supersedes them.
    pub retracted: Vec<PendingKey>,
    /// Entries for the same record kept because the event predates them.
    pub retained: Vec<PendingKey>,
    /// Whether the event carried the request tag of a pending entry.
    pub own_write: bool,
}

impl Reconciliation {
    pub fn is_unrelated(&self) -> bool {
        self.retracted.is_empty() && self.retained.is_empty()
    }
}

/// Retracts the pending entries a change event makes obsolete.
///
/// 1. An event echoing a pending entry's request tag confirms that entry.
/// 2. Otherwise each entry targeting the event's record is retracted when
///    the event was committed at or after the entry was created (a later
///    write, ours or a concurrent one, is authoritative) or when the event
///    has no commit time. Entries created after the event's commit stay and
///    keep overlaying the collection.
pub fn reconcile_event(ledger: &mut PendingLedger, event: &ChangeEvent) -> Reconciliation {
    let mut outcome = Reconciliation::default();

    if let Some(request) = event.client_request_id
        && let Some(key) = ledger.key_for_request(request)
    {
        ledger.remove(&key);
        tracing::debug!(key = %key, entity = %event.entity, "pending update confirmed by own event");
        outcome.retracted.push(key);
        outcome.own_write = true;
        return outcome;
    }

    for key in ledger.keys_for_event(event) {
        let Some(pending) = ledger.get(&key) else {
            continue;
        };
        let predates_pending = event
            .committed_at
            .is_some_and(|committed| committed < pending.created_at);
        if predates_pending {
            outcome.retained.push(key);
        } else {
            ledger.remove(&key);
            outcome.retracted.push(key);
        }
    }
    if !outcome.retracted.is_empty() {
        let record = event
            .identity()
            .map(|identity| identity.to_string())
            .unwrap_or_default();
        tracing::debug!(
            entity = %event.entity,
            record = %record,
            retracted = outcome.retracted.len(),
            "pending updates superseded by change event"
        );
    }
    outcome
}
