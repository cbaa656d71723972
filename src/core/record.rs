//! Records, record identity, and equality filters.
//!
//! Records are schemaless JSON objects: the sync layer only needs their
//! identity and field-level merge, never their meaning.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::{CoreError, InvalidFilter, InvalidRecord};
use super::identity::RecordId;

pub const ID_FIELD: &str = "id";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn from_value(value: Value) -> Result<Self, CoreError> {
        match value {
            Value::Object(fields) => Ok(Self(fields)),
            other => Err(InvalidRecord {
                reason: format!("expected object, got {}", json_kind(&other)),
            }
            .into()),
        }
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(field.into(), value.into())
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The `id` field as a record id. Numeric ids are rendered in decimal.
    pub fn id(&self) -> Option<RecordId> {
        self.get(ID_FIELD)
            .and_then(scalar_text)
            .and_then(|raw| RecordId::new(raw).ok())
    }

    pub fn identity(&self) -> Option<RecordIdentity> {
        self.id().map(RecordIdentity::Id)
    }

    /// Field-by-field merge: fields in `patch` override, everything else is kept.
    pub fn merged_with(&self, patch: &Record) -> Record {
        let mut merged = self.0.clone();
        for (field, value) in &patch.0 {
            merged.insert(field.clone(), value.clone());
        }
        Record(merged)
    }

    pub fn matches(&self, identity: &RecordIdentity) -> bool {
        match identity {
            RecordIdentity::Id(id) => self.id().as_ref() == Some(id),
            RecordIdentity::Composite(fields) => {
                !fields.is_empty()
                    && fields
                        .iter()
                        .all(|(field, expected)| self.get(field) == Some(expected))
            }
        }
    }
}

impl TryFrom<Value> for Record {
    type Error = CoreError;
    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Record::from_value(value)
    }
}

/// How a record is located inside a collection.
///
/// Most entities are keyed by `id`; some are keyed by a natural composite key
/// (e.g. `habit_id` + `date` for a daily completion).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordIdentity {
    Id(RecordId),
    Composite(BTreeMap<String, Value>),
}

impl RecordIdentity {
    pub fn composite<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self::Composite(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Identity carried by a record pre-image: its id when present, otherwise
    /// every field it carries as a composite key.
    pub fn from_pre_image(record: &Record) -> Option<Self> {
        if let Some(id) = record.id() {
            return Some(Self::Id(id));
        }
        if record.is_empty() {
            return None;
        }
        Some(Self::Composite(
            record
                .fields()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ))
    }

    pub fn as_id(&self) -> Option<&RecordId> {
        match self {
            Self::Id(id) => Some(id),
            Self::Composite(_) => None,
        }
    }

    /// Whether `other` locates the record `self` names.
    ///
    /// Ids compare by equality. A composite key is satisfied by any composite
    /// identity carrying all of its fields with equal values, so a pre-image
    /// with extra columns still locates the row.
    pub fn is_within(&self, other: &RecordIdentity) -> bool {
        match (self, other) {
            (Self::Id(a), Self::Id(b)) => a == b,
            (Self::Composite(key), Self::Composite(carried)) => {
                !key.is_empty()
                    && key
                        .iter()
                        .all(|(field, expected)| carried.get(field) == Some(expected))
            }
            (Self::Id(_), Self::Composite(_)) | (Self::Composite(_), Self::Id(_)) => false,
        }
    }
}

impl fmt::Display for RecordIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Composite(fields) => {
                let mut first = true;
                for (field, value) in fields {
                    if !first {
                        f.write_str(",")?;
                    }
                    first = false;
                    match scalar_text(value) {
                        Some(text) => write!(f, "{field}={text}")?,
                        None => write!(f, "{field}={value}")?,
                    }
                }
                Ok(())
            }
        }
    }
}

/// Equality predicate on one column, written `column=eq.value`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Filter {
    pub column: String,
    pub value: String,
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Result<Self, CoreError> {
        let column = column.into();
        let value = value.into();
        if column.trim().is_empty() {
            return Err(InvalidFilter {
                raw: format!("{column}=eq.{value}"),
                reason: "empty column".into(),
            }
            .into());
        }
        Ok(Self { column, value })
    }

    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let invalid = |reason: &str| -> CoreError {
            InvalidFilter {
                raw: raw.to_string(),
                reason: reason.to_string(),
            }
            .into()
        };
        let (column, rest) = raw.split_once('=').ok_or_else(|| invalid("missing `=`"))?;
        let value = rest
            .strip_prefix("eq.")
            .ok_or_else(|| invalid("only `eq.` predicates are supported"))?;
        let column = column.trim();
        if column.is_empty() {
            return Err(invalid("empty column"));
        }
        Ok(Self {
            column: column.to_string(),
            value: value.to_string(),
        })
    }

    /// A record matches when its column renders to exactly the filter value.
    pub fn matches(&self, record: &Record) -> bool {
        record
            .get(&self.column)
            .is_some_and(|value| self.matches_value(value))
    }

    pub fn matches_value(&self, value: &Value) -> bool {
        scalar_text(value).is_some_and(|text| text == self.value)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=eq.{}", self.column, self.value)
    }
}

impl FromStr for Filter {
    type Err = CoreError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Filter::parse(s)
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
