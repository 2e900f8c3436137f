//! # Core Type Definitions
//!
//! Identifiers, cell values and rows shared by every layer:
//! - Entity and edge identifiers (`EntityId`, `EdgeId`)
//! - Typed cell values (`Value`) and column types (`ColumnType`)
//! - Rows (`Row`), an ordered column → value mapping
//!
//! All collections use `BTreeMap` so that stored bytes and query output are
//! deterministic.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Primary key of a row in an entity table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a directed edge inside one network.
///
/// For parent-column storage this is the child's key, for join-table storage
/// it is the key of the join row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeId(pub u64);

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// COLUMN TYPES
// =============================================================================

/// Storage type of a column.
///
/// Reference columns hold the integer key of a row in `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Integer,
    Text,
    Boolean,
    Reference { target: String },
}

impl ColumnType {
    /// Short type name as written in schema files.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Text => "text",
            Self::Boolean => "boolean",
            Self::Reference { .. } => "reference",
        }
    }

    /// Whether `value` may be stored in a column of this type.
    ///
    /// `Null` is accepted here; nullability is checked by the table spec.
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (_, Value::Null)
                | (Self::Integer | Self::Reference { .. }, Value::Integer(_))
                | (Self::Text, Value::Text(_))
                | (Self::Boolean, Value::Boolean(_))
        )
    }
}

/// Bare type names accepted by the schema parser, before reference targets are attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeName {
    Integer,
    Text,
    Boolean,
    Reference,
}

impl FromStr for TypeName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "integer" | "int" => Ok(Self::Integer),
            "text" | "string" => Ok(Self::Text),
            "boolean" | "bool" => Ok(Self::Boolean),
            "reference" | "references" => Ok(Self::Reference),
            other => Err(other.to_string()),
        }
    }
}

// =============================================================================
// VALUES & ROWS
// =============================================================================

/// A single cell value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub enum Value {
    #[default]
    Null,
    Integer(i64),
    Text(String),
    Boolean(bool),
}

impl Value {
    /// Human-readable kind, used in type mismatch errors.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Integer(_) => "integer",
            Self::Text(_) => "text",
            Self::Boolean(_) => "boolean",
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Interpret the value as a row key (non-negative integer).
    #[must_use]
    pub fn as_entity(&self) -> Option<EntityId> {
        self.as_integer()
            .and_then(|i| u64::try_from(i).ok())
            .map(EntityId)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<EntityId> for Value {
    fn from(v: EntityId) -> Self {
        Self::Integer(i64::try_from(v.0).unwrap_or(i64::MAX))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// A stored row: column name → value, without the implicit `id` key.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Row(BTreeMap<String, Value>);

impl Row {
    /// Create an empty row.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    #[must_use]
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(column.into(), value.into());
        self
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(column.into(), value.into());
    }

    /// Value of `column`, or `None` if the column is absent.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    /// Value of `column`, treating an absent column as `Null`.
    #[must_use]
    pub fn value(&self, column: &str) -> &Value {
        static NULL: Value = Value::Null;
        self.0.get(column).unwrap_or(&NULL)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// =============================================================================
// TESTS
// =============================================================================
