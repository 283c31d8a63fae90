//! Data models for the corpus document and its entity records.
//!
//! This module defines the core data structures used throughout the pipeline:
//! - [`CorpusDocument`]: the on-disk JSON document (summary header + entities)
//! - [`Entity`]: one listing, an ordered map of named JSON fields
//! - [`EntityId`]: the normalised, immutable key of an entity
//! - [`PartialRecord`]: the subset of fields an extractor managed to produce
//! - [`SerialStatus`]: the closed vocabulary of completion-status tokens
//!
//! Entities are schema-less. Each pass only knows about the
//! handful of fields it reads or writes (see [`crate::config::FieldNames`]);
//! everything else is carried through untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// The persistent corpus: a free-form summary header and every entity in
/// collection order.
///
/// Older corpora used `collectionSummary` / `detailedNovels` as top-level
/// keys; both spellings are accepted on read, the short ones are written.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct CorpusDocument {
    /// Run metadata. Each pass adds or refreshes its own keyed block.
    #[serde(default, alias = "collectionSummary")]
    pub summary: Map<String, Value>,
    /// All entities, in overall corpus order.
    #[serde(alias = "detailedNovels")]
    pub entities: Vec<Entity>,
}

/// One corpus record.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Entity(Map<String, Value>);

impl Entity {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Insert or replace a field.
    pub fn set(&mut self, field: &str, value: impl Into<Value>) {
        self.0.insert(field.to_string(), value.into());
    }

    /// `true` when the field exists and is neither `null` nor an empty string.
    pub fn has_value(&self, field: &str) -> bool {
        self.0.get(field).is_some_and(is_present)
    }

    /// `true` when the field is a JSON `true`.
    pub fn is_flagged(&self, field: &str) -> bool {
        matches!(self.0.get(field), Some(Value::Bool(true)))
    }

    /// Read the entity's identifier from `id_field`.
    pub fn id(&self, id_field: &str) -> Option<EntityId> {
        self.0.get(id_field).and_then(EntityId::from_value)
    }

    /// Human-friendly label for logs: the title when present, else the id.
    pub fn label(&self, title_field: &str, id_field: &str) -> String {
        match self.0.get(title_field) {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            _ => self
                .id(id_field)
                .map(|id| id.to_string())
                .unwrap_or_else(|| "<no id>".to_string()),
        }
    }
}

/// A JSON value counts as present unless it is `null` or `""`.
pub fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

/// Normalised entity identifier.
///
/// Corpora store ids either as JSON strings or numbers; both map onto the same
/// string key so lookups do not depend on how a collector happened to encode
/// them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.trim().is_empty() => Some(Self(s.trim().to_string())),
            Value::Number(n) => Some(Self(n.to_string())),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fields produced by one extraction.
///
/// Keeps insertion order so merges and logs are deterministic. A field set to
/// `None`/`null` is recorded as absent and is never merged over existing data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialRecord {
    fields: Vec<(String, Value)>,
}

impl PartialRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a field, replacing any earlier value for the same name.
    pub fn set(&mut self, field: &str, value: Option<Value>) {
        let value = value.unwrap_or(Value::Null);
        match self.fields.iter_mut().find(|(name, _)| name == field) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((field.to_string(), value)),
        }
    }

    pub fn with(mut self, field: &str, value: Option<Value>) -> Self {
        self.set(field, value);
        self
    }

    /// The field's value, if it was populated.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, value)| name == field && is_present(value))
            .map(|(_, value)| value)
    }

    /// Populated fields only, in insertion order.
    pub fn populated(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields
            .iter()
            .filter(|(_, value)| is_present(value))
            .map(|(name, value)| (name.as_str(), value))
    }

    /// `true` when not a single field was populated.
    pub fn is_empty(&self) -> bool {
        self.populated().next().is_none()
    }
}

/// Serialization status tokens as they appear on the upstream pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialStatus {
    Completed,
    Ongoing,
    Hiatus,
    Discontinued,
}

impl SerialStatus {
    pub const ALL: [SerialStatus; 4] = [
        SerialStatus::Completed,
        SerialStatus::Ongoing,
        SerialStatus::Hiatus,
        SerialStatus::Discontinued,
    ];

    pub fn label(self) -> &'static str {
        match self {
            SerialStatus::Completed => "완결",
            SerialStatus::Ongoing => "연재중",
            SerialStatus::Hiatus => "휴재",
            SerialStatus::Discontinued => "중단",
        }
    }

    /// Exact token match (after trimming).
    pub fn from_token(token: &str) -> Option<Self> {
        let token = token.trim();
        Self::ALL.into_iter().find(|s| s.label() == token)
    }

    /// Completed/ongoing derived from a boolean termination flag.
    pub fn from_terminated(terminated: bool) -> Self {
        if terminated {
            SerialStatus::Completed
        } else {
            SerialStatus::Ongoing
        }
    }
}

impl fmt::Display for SerialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
