//! Graph store boundary
//!
//! The property-graph database is an external collaborator. Components talk
//! to it only through [`GraphStore`], using the closed [`GraphQuery`] and
//! [`GraphCommand`] vocabularies instead of interpolated query strings.

mod memory;
/// Query and command vocabularies
pub mod query;
/// Records, entity types and identifiers
pub mod types;

pub use memory::MemoryGraphStore;
pub use query::{GraphCommand, GraphQuery};
pub use types::{
    validate_identifier, ClearScope, EntityType, NodeRecord, RelationshipRecord, Row, StoreStats,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors raised by graph store implementations
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// Store cannot be reached
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Label outside the entity model
    #[error("Unknown entity type: {0}")]
    UnknownEntityType(String),

    /// Unsafe property or label name
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// No node with this id
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// No relationship with this id
    #[error("Relationship not found: {0}")]
    RelationshipNotFound(String),

    /// Store rejected the operation
    #[error("Query failed: {0}")]
    QueryFailed(String),
}

/// Result alias for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Property-graph store operations needed by the data-protection components
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Human-readable store name (site name for secondaries)
    fn name(&self) -> &str;

    /// Trivial liveness check
    async fn ping(&self) -> StoreResult<()>;

    /// Live entity and relationship counts
    async fn stats(&self) -> StoreResult<StoreStats>;

    /// Export nodes, optionally restricted to one entity type and to nodes
    /// modified at or after `modified_since`
    async fn export_nodes(
        &self,
        label: Option<EntityType>,
        modified_since: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<NodeRecord>>;

    /// Export relationships, optionally only those modified at or after
    /// `modified_since`
    async fn export_relationships(
        &self,
        modified_since: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<RelationshipRecord>>;

    /// Create a node and return its new identity
    async fn create_node(&self, labels: &[String], properties: Map<String, Value>)
        -> StoreResult<String>;

    /// Create a relationship between two existing nodes
    async fn create_relationship(
        &self,
        start_id: &str,
        end_id: &str,
        rel_type: &str,
        properties: Map<String, Value>,
    ) -> StoreResult<String>;

    /// Delete everything in `scope`, returning the number of removed nodes
    async fn clear(&self, scope: &ClearScope) -> StoreResult<u64>;

    /// Run a read query
    async fn query(&self, query: &GraphQuery) -> StoreResult<Vec<Row>>;

    /// Run a write command, returning the number of affected entities
    async fn execute(&self, command: &GraphCommand) -> StoreResult<u64>;
}
