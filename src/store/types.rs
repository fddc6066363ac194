//! Records and identifiers exchanged with the graph store

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::{StoreError, StoreResult};

/// Result row returned by a [`super::GraphQuery`]
pub type Row = Map<String, Value>;

lazy_static! {
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,63}$").unwrap();
}

/// Check a property, label or relationship-type name against the identifier
/// allow-list before it reaches the store
pub fn validate_identifier(name: &str) -> StoreResult<()> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}

/// Closed set of case-management entity types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityType {
    /// Legal matter
    Case,
    /// Party the firm represents
    Client,
    /// Any other individual
    Person,
    /// Filed or produced document
    Document,
    /// Work item
    Task,
    /// Free-text note
    Note,
    /// Hearing, deadline or meeting
    Event,
    /// Company or agency
    Organization,
    /// Exhibit or item of evidence
    Evidence,
    /// Staff account
    User,
}

impl EntityType {
    /// Every entity type
    pub const ALL: [EntityType; 10] = [
        EntityType::Case,
        EntityType::Client,
        EntityType::Person,
        EntityType::Document,
        EntityType::Task,
        EntityType::Note,
        EntityType::Event,
        EntityType::Organization,
        EntityType::Evidence,
        EntityType::User,
    ];

    /// Store label
    pub fn label(&self) -> &'static str {
        match self {
            EntityType::Case => "Case",
            EntityType::Client => "Client",
            EntityType::Person => "Person",
            EntityType::Document => "Document",
            EntityType::Task => "Task",
            EntityType::Note => "Note",
            EntityType::Event => "Event",
            EntityType::Organization => "Organization",
            EntityType::Evidence => "Evidence",
            EntityType::User => "User",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for EntityType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityType::ALL
            .iter()
            .copied()
            .find(|t| t.label().eq_ignore_ascii_case(s))
            .ok_or_else(|| StoreError::UnknownEntityType(s.to_string()))
    }
}

/// A node as exported from or replayed into the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Store-assigned id
    pub id: String,
    /// Labels
    pub labels: Vec<String>,
    /// Properties
    #[serde(default)]
    pub properties: Map<String, Value>,
    /// Last modification, when tracked
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
}

impl NodeRecord {
    /// Whether `label` is present
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    /// Whether the node is of `entity` type
    pub fn is_a(&self, entity: EntityType) -> bool {
        self.has_label(entity.label())
    }
}

/// A relationship as exported from or replayed into the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipRecord {
    /// Store-assigned id
    pub id: String,
    /// Relationship type
    pub rel_type: String,
    /// Start node id
    pub start_id: String,
    /// End node id
    pub end_id: String,
    /// Properties
    #[serde(default)]
    pub properties: Map<String, Value>,
    /// Last modification, when tracked
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
}

/// Live store statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Nodes
    pub node_count: u64,
    /// Relationships
    pub relationship_count: u64,
    /// Nodes per label
    pub label_counts: BTreeMap<String, u64>,
}

/// What a restore clears before replaying
#[derive(Debug, Clone, PartialEq)]
pub enum ClearScope {
    /// Every node and relationship
    All,
    /// Only these node ids, with their relationships
    Nodes(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_type_allow_list() {
        assert_eq!("case".parse::<EntityType>().unwrap(), EntityType::Case);
        assert_eq!("Document".parse::<EntityType>().unwrap(), EntityType::Document);
        assert!(matches!(
            "Case) DETACH DELETE n //".parse::<EntityType>(),
            Err(StoreError::UnknownEntityType(_))
        ));
    }

    #[test]
    fn test_identifier_validation() {
        assert!(validate_identifier("case_number").is_ok());
        assert!(validate_identifier("_internal").is_ok());
        assert!(validate_identifier("1abc").is_err());
        assert!(validate_identifier("name}) SET n.x = 1").is_err());
        assert!(validate_identifier("").is_err());
    }
}
