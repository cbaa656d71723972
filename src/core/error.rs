//! Core capability errors (parsing and validation of domain atoms).
//!
//! These are bounded and stable: core errors represent refusal states for
//! malformed input, not library implementation details.

use thiserror::Error;

use crate::error::{Effect, Transience};

/// Invalid identifier.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidId {
    #[error("entity class `{raw}` is invalid: {reason}")]
    EntityClass { raw: String, reason: String },
    #[error("record id `{raw}` is invalid: {reason}")]
    Record { raw: String, reason: String },
    #[error("pending key `{raw}` is invalid: {reason}")]
    PendingKey { raw: String, reason: String },
    #[error("client request id `{raw}` is invalid: {reason}")]
    ClientRequestId { raw: String, reason: String },
}

/// Filter expression that is not a supported equality predicate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("filter `{raw}` is invalid: {reason}")]
pub struct InvalidFilter {
    pub raw: String,
    pub reason: String,
}

/// Record payload that is not a usable JSON object.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("record is invalid: {reason}")]
pub struct InvalidRecord {
    pub reason: String,
}

/// Change notification whose shape does not match its event type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("change event for `{table}` is invalid: {reason}")]
pub struct InvalidChange {
    pub table: String,
    pub reason: String,
}

/// Canonical error enum for core capability.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CoreError {
    #[error(transparent)]
    InvalidId(#[from] InvalidId),
    #[error(transparent)]
    InvalidFilter(#[from] InvalidFilter),
    #[error(transparent)]
    InvalidRecord(#[from] InvalidRecord),
    #[error(transparent)]
    InvalidChange(#[from] InvalidChange),
}

impl CoreError {
    pub fn transience(&self) -> Transience {
        // Core errors are pure input failures.
        Transience::Permanent
    }

    pub fn effect(&self) -> Effect {
        Effect::None
    }
}
