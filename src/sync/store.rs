//! Remote store seam: the fetch/insert/update/delete calls the service wraps.

use std::fmt;

use thiserror::Error;

use crate::core::{ClientRequestId, EntityClass, Filter, Record, RecordIdentity};
use crate::error::{Effect, Transience};

/// Read scope, e.g. "habits of user X for month Y".
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Scope {
    pub entity: EntityClass,
    pub filter: Option<Filter>,
    /// Free-form qualifier such as a month, part of the cache key.
    pub label: Option<String>,
}

pub(crate) const SCOPE_SEPARATOR: char = '|';

impl Scope {
    pub fn new(entity: EntityClass) -> Self {
        Self {
            entity,
            filter: None,
            label: None,
        }
    }

    pub fn filtered(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn labeled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Stable cache key; every scope of one entity shares the
    /// `entity_prefix` of that entity.
    pub fn cache_key(&self) -> String {
        let filter = self.filter.as_ref().map(Filter::to_string).unwrap_or_default();
        let label = self.label.as_deref().unwrap_or_default();
        format!(
            "{}{SCOPE_SEPARATOR}{filter}{SCOPE_SEPARATOR}{label}",
            self.entity
        )
    }

    pub fn entity_prefix(entity: &EntityClass) -> String {
        format!("{entity}{SCOPE_SEPARATOR}")
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.entity)?;
        if let Some(filter) = &self.filter {
            write!(f, " where {filter}")?;
        }
        if let Some(label) = &self.label {
            write!(f, " ({label})")?;
        }
        Ok(())
    }
}

/// Remote relational store. Writes carry the mutation's request tag so the
/// store can echo it on the resulting change event.
pub trait RemoteStore: Send + Sync {
    fn fetch(&self, scope: &Scope) -> Result<Vec<Record>, StoreError>;

    /// Inserts `record` and returns the stored row (with its server id).
    fn insert(
        &self,
        entity: &EntityClass,
        record: &Record,
        request: ClientRequestId,
    ) -> Result<Record, StoreError>;

    /// Patches the row matching `target` and returns the stored row.
    fn update(
        &self,
        entity: &EntityClass,
        target: &RecordIdentity,
        fields: &Record,
        request: ClientRequestId,
    ) -> Result<Record, StoreError>;

    fn delete(
        &self,
        entity: &EntityClass,
        target: &RecordIdentity,
        request: ClientRequestId,
    ) -> Result<(), StoreError>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("remote store unreachable: {reason}")]
    Unreachable { reason: String },
    #[error("remote store rejected the request: {reason}")]
    Rejected { reason: String },
    #[error("{entity} record {identity} not found")]
    NotFound { entity: EntityClass, identity: String },
}

impl StoreError {
    pub fn transience(&self) -> Transience {
        match self {
            StoreError::Unreachable { .. } => Transience::Retryable,
            StoreError::Rejected { .. } | StoreError::NotFound { .. } => Transience::Permanent,
        }
    }

    /// A write that timed out on the wire may still have landed.
    pub fn effect(&self) -> Effect {
        match self {
            StoreError::Unreachable { .. } => Effect::Unknown,
            StoreError::Rejected { .. } | StoreError::NotFound { .. } => Effect::None,
        }
    }
}
