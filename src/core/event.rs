//! Change events and subscription keys.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{CoreError, InvalidChange};
use super::identity::{ClientRequestId, EntityClass};
use super::record::{Filter, Record, RecordIdentity};
use super::time::WallClock;

/// One logical upstream channel: an entity class plus an optional filter.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubscriptionKey {
    pub entity: EntityClass,
    pub filter: Option<Filter>,
}

impl SubscriptionKey {
    pub fn new(entity: EntityClass, filter: Option<Filter>) -> Self {
        Self { entity, filter }
    }

    /// Whether an event passes this key's entity and filter.
    ///
    /// Delete pre-images usually carry only the key columns, so a delete is
    /// rejected by the filter only when the filtered column is present and
    /// disagrees.
    pub fn admits(&self, event: &ChangeEvent) -> bool {
        if event.entity != self.entity {
            return false;
        }
        let Some(filter) = &self.filter else {
            return true;
        };
        match &event.kind {
            ChangeKind::Insert { new } | ChangeKind::Update { new, .. } => filter.matches(new),
            ChangeKind::Delete {
                old: RecordIdentity::Composite(fields),
            } => fields
                .get(&filter.column)
                .is_none_or(|value| filter.matches_value(value)),
            ChangeKind::Delete {
                old: RecordIdentity::Id(_),
            } => true,
        }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.filter {
            Some(filter) => write!(f, "{}:{}", self.entity, filter),
            None => write!(f, "{}", self.entity),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ChangeKind {
    Insert {
        new: Record,
    },
    Update {
        new: Record,
        old: Option<RecordIdentity>,
    },
    Delete {
        old: RecordIdentity,
    },
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert { .. } => "insert",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
        }
    }
}

/// A write observed upstream, from this device or any other.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeEvent {
    pub entity: EntityClass,
    pub kind: ChangeKind,
    /// Commit time reported by the store, when it reports one.
    pub committed_at: Option<WallClock>,
    /// Request tag echoed back by the store for writes that carried one.
    pub client_request_id: Option<ClientRequestId>,
}

impl ChangeEvent {
    pub fn insert(entity: EntityClass, new: Record) -> Self {
        Self::from_kind(entity, ChangeKind::Insert { new })
    }

    pub fn update(entity: EntityClass, new: Record) -> Self {
        Self::from_kind(entity, ChangeKind::Update { new, old: None })
    }

    pub fn delete(entity: EntityClass, old: RecordIdentity) -> Self {
        Self::from_kind(entity, ChangeKind::Delete { old })
    }

    fn from_kind(entity: EntityClass, kind: ChangeKind) -> Self {
        Self {
            entity,
            kind,
            committed_at: None,
            client_request_id: None,
        }
    }

    pub fn committed_at(mut self, at: WallClock) -> Self {
        self.committed_at = Some(at);
        self
    }

    pub fn with_request(mut self, request: ClientRequestId) -> Self {
        self.client_request_id = Some(request);
        self
    }

    /// Post-image for inserts and updates.
    pub fn record(&self) -> Option<&Record> {
        match &self.kind {
            ChangeKind::Insert { new } | ChangeKind::Update { new, .. } => Some(new),
            ChangeKind::Delete { .. } => None,
        }
    }

    /// Whether this event touches the record named by `target`.
    ///
    /// Post-images are matched field by field, so a composite key finds a row
    /// whose image also carries an `id`. Pre-images must carry every field of
    /// the key.
    pub fn affects(&self, target: &RecordIdentity) -> bool {
        match &self.kind {
            ChangeKind::Insert { new } => new.matches(target),
            ChangeKind::Update { new, old } => {
                new.matches(target) || old.as_ref().is_some_and(|old| target.is_within(old))
            }
            ChangeKind::Delete { old } => target.is_within(old),
        }
    }

    /// Identity of the affected record.
    pub fn identity(&self) -> Option<RecordIdentity> {
        match &self.kind {
            ChangeKind::Insert { new } => new.identity(),
            ChangeKind::Update { new, old } => new.identity().or_else(|| old.clone()),
            ChangeKind::Delete { old } => Some(old.clone()),
        }
    }
}

impl TryFrom<RawChange> for ChangeEvent {
    type Error = CoreError;

    fn try_from(raw: RawChange) -> Result<Self, Self::Error> {
        let invalid = |reason: &str| -> CoreError {
            InvalidChange {
                table: raw.table.clone(),
                reason: reason.to_string(),
            }
            .into()
        };
        let entity = EntityClass::new(raw.table.clone())?;
        let new = non_empty_record(raw.new.clone())?;
        let old = non_empty_record(raw.old.clone())?;

        let kind = match raw.event_type {
            RawEventType::Insert => {
                let new = new.ok_or_else(|| invalid("insert without post-image"))?;
                if new.id().is_none() {
                    return Err(invalid("insert post-image has no id"));
                }
                ChangeKind::Insert { new }
            }
            RawEventType::Update => {
                let new = new.ok_or_else(|| invalid("update without post-image"))?;
                if new.id().is_none() {
                    return Err(invalid("update post-image has no id"));
                }
                let old = old.as_ref().and_then(RecordIdentity::from_pre_image);
                ChangeKind::Update { new, old }
            }
            RawEventType::Delete => {
                let old = old
                    .as_ref()
                    .and_then(RecordIdentity::from_pre_image)
                    .ok_or_else(|| invalid("delete without identifying pre-image"))?;
                ChangeKind::Delete { old }
            }
        };

        Ok(Self {
            entity,
            kind,
            committed_at: raw.commit_timestamp.map(WallClock),
            client_request_id: raw.client_request_id,
        })
    }
}

fn non_empty_record(value: Option<Value>) -> Result<Option<Record>, CoreError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(value) => {
            let record = Record::from_value(value)?;
            Ok((!record.is_empty()).then_some(record))
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RawEventType {
    Insert,
    Update,
    Delete,
}

/// Change notification as delivered by the push transport.
///
/// `commit_timestamp` is milliseconds since the Unix epoch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawChange {
    pub table: String,
    #[serde(rename = "eventType")]
    pub event_type: RawEventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_timestamp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_request_id: Option<ClientRequestId>,
}
