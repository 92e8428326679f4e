// src/models/records.rs
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Primary key of a canonical entity in the registry.
pub type EntityId = i64;

/// The kinds of canonical entity the engine links against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Person,
    Party,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Person => "person",
            EntityKind::Party => "party",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "person" => Some(EntityKind::Person),
            "party" => Some(EntityKind::Party),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a row in an incoming batch, as assigned by the data source
/// (e.g. `"2019/vote/1432/17"`). Carried through every stage of linking so
/// outcomes never depend on row position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchKey(String);

impl BatchKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BatchKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A messy record together with its batch identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessyRow<R> {
    pub key: BatchKey,
    #[serde(flatten)]
    pub record: R,
}

impl<R> MessyRow<R> {
    pub fn new(key: impl Into<String>, record: R) -> Self {
        Self {
            key: BatchKey::new(key),
            record,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalPerson {
    pub id: EntityId,
    pub name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalParty {
    pub id: EntityId,
    pub denomination: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessyPerson {
    pub name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessyParty {
    pub denomination: String,
    /// Source spelling kept verbatim for writers; never compared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternate_denomination: Option<String>,
}

/// The comparison view of a record: normalized values keyed by field name.
///
/// Built by an explicit mapping per entity kind. `id` is only set for
/// canonical records and is stripped before a pair is persisted to a
/// training corpus.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct ComparisonRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,
    pub fields: BTreeMap<String, String>,
}

impl ComparisonRecord {
    pub fn new<I, K, V>(id: Option<EntityId>, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            id,
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, field: &str) -> &str {
        self.fields.get(field).map(String::as_str).unwrap_or("")
    }

    /// Same record with the id removed.
    pub fn without_id(&self) -> Self {
        Self {
            id: None,
            fields: self.fields.clone(),
        }
    }

    /// True when every comparison field holds the same normalized value.
    pub fn same_fields(&self, other: &ComparisonRecord) -> bool {
        self.fields == other.fields
    }

    /// All field values joined by a single space, in field-name order.
    pub fn joined(&self) -> String {
        self.fields
            .values()
            .filter(|v| !v.is_empty())
            .cloned()
            .collect::<Vec<_>>()
            .join(" ")
    }
}
