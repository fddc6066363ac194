//! Declarative read queries and write commands
//!
//! Both enums are closed and serde-tagged so that rule, migration and recovery
//! definition files deserialize straight into them. Every identifier is checked
//! with [`validate_identifier`] and every label is an [`EntityType`], which
//! keeps the query surface finite.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{validate_identifier, EntityType};
use super::StoreResult;

/// Read-only pattern queries. Integrity checks expect an empty result when
/// the invariant holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GraphQuery {
    /// One row `{count}`
    CountNodes {
        #[serde(default)]
        label: Option<EntityType>,
    },
    /// Rows `{node_id}` for nodes lacking `property`
    NodesMissingProperty { label: EntityType, property: String },
    /// Rows `{node_id, property, value}` where the value is not in `allowed`
    NodesWithInvalidValue {
        label: EntityType,
        property: String,
        allowed: Vec<Value>,
    },
    /// Rows `{node_id, property, value, duplicate_count}` for every node
    /// sharing a value with another node
    DuplicatePropertyValues { label: EntityType, property: String },
    /// Rows `{node_id}` for nodes without any relationship
    OrphanNodes { label: EntityType },
    /// Rows `{relationship_id, rel_type, start_id, end_id, missing_endpoint}`
    DanglingRelationships,
    /// Rows `{relationship_id, start_id, end_id}` where an endpoint has the
    /// wrong entity type
    RelationshipEndpointMismatch {
        rel_type: String,
        start_label: EntityType,
        end_label: EntityType,
    },
    /// Rows `{node_id, <earlier>, <later>}` where `earlier > later`
    PropertyOrderViolation {
        label: EntityType,
        earlier: String,
        later: String,
    },
    /// Rows `{node_id}` for nodes carrying `property` (equal to `value` if set)
    NodesWithProperty {
        label: EntityType,
        property: String,
        #[serde(default)]
        value: Option<Value>,
    },
    /// One row `{valid}` telling whether the index exists
    IndexExists { label: EntityType, property: String },
}

impl GraphQuery {
    /// Check every identifier in the query
    pub fn validate(&self) -> StoreResult<()> {
        match self {
            GraphQuery::CountNodes { .. } | GraphQuery::DanglingRelationships => Ok(()),
            GraphQuery::NodesMissingProperty { property, .. }
            | GraphQuery::NodesWithInvalidValue { property, .. }
            | GraphQuery::DuplicatePropertyValues { property, .. }
            | GraphQuery::NodesWithProperty { property, .. }
            | GraphQuery::IndexExists { property, .. } => validate_identifier(property),
            GraphQuery::OrphanNodes { .. } => Ok(()),
            GraphQuery::RelationshipEndpointMismatch { rel_type, .. } => {
                validate_identifier(rel_type)
            }
            GraphQuery::PropertyOrderViolation { earlier, later, .. } => {
                validate_identifier(earlier)?;
                validate_identifier(later)
            }
        }
    }

    /// Entity type the query is scoped to, if any
    pub fn scope(&self) -> Option<EntityType> {
        match self {
            GraphQuery::CountNodes { label } => *label,
            GraphQuery::NodesMissingProperty { label, .. }
            | GraphQuery::NodesWithInvalidValue { label, .. }
            | GraphQuery::DuplicatePropertyValues { label, .. }
            | GraphQuery::OrphanNodes { label }
            | GraphQuery::PropertyOrderViolation { label, .. }
            | GraphQuery::NodesWithProperty { label, .. }
            | GraphQuery::IndexExists { label, .. } => Some(*label),
            GraphQuery::RelationshipEndpointMismatch { start_label, .. } => Some(*start_label),
            GraphQuery::DanglingRelationships => None,
        }
    }
}

/// Write commands used by migrations, auto-fixes and restores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum GraphCommand {
    /// Set `property` on every node of `label`
    SetProperty {
        label: EntityType,
        property: String,
        value: Value,
        #[serde(default)]
        only_if_missing: bool,
    },
    /// Drop `property` from every node of `label`
    RemoveProperty { label: EntityType, property: String },
    /// Rename a property on every node of `label`
    RenameProperty {
        label: EntityType,
        from: String,
        to: String,
    },
    /// Add `new_label` to every node of `label`
    AddLabel { label: EntityType, new_label: String },
    /// Remove `removed` from every node of `label`
    RemoveLabel { label: EntityType, removed: String },
    /// Set a property on one node
    SetNodeProperty {
        node_id: String,
        property: String,
        value: Value,
    },
    /// Drop a property from one node
    RemoveNodeProperty { node_id: String, property: String },
    /// Detach-delete one node
    DeleteNode { node_id: String },
    /// Delete one relationship
    DeleteRelationship { relationship_id: String },
    /// Create an index
    CreateIndex { label: EntityType, property: String },
    /// Drop an index
    DropIndex { label: EntityType, property: String },
}

impl GraphCommand {
    /// Check every identifier in the command
    pub fn validate(&self) -> StoreResult<()> {
        match self {
            GraphCommand::SetProperty { property, .. }
            | GraphCommand::RemoveProperty { property, .. }
            | GraphCommand::SetNodeProperty { property, .. }
            | GraphCommand::RemoveNodeProperty { property, .. }
            | GraphCommand::CreateIndex { property, .. }
            | GraphCommand::DropIndex { property, .. } => validate_identifier(property),
            GraphCommand::RenameProperty { from, to, .. } => {
                validate_identifier(from)?;
                validate_identifier(to)
            }
            GraphCommand::AddLabel { new_label, .. } => validate_identifier(new_label),
            GraphCommand::RemoveLabel { removed, .. } => validate_identifier(removed),
            GraphCommand::DeleteNode { .. } | GraphCommand::DeleteRelationship { .. } => Ok(()),
        }
    }

    /// Short operation name for logs
    pub fn op_name(&self) -> &'static str {
        match self {
            GraphCommand::SetProperty { .. } => "set_property",
            GraphCommand::RemoveProperty { .. } => "remove_property",
            GraphCommand::RenameProperty { .. } => "rename_property",
            GraphCommand::AddLabel { .. } => "add_label",
            GraphCommand::RemoveLabel { .. } => "remove_label",
            GraphCommand::SetNodeProperty { .. } => "set_node_property",
            GraphCommand::RemoveNodeProperty { .. } => "remove_node_property",
            GraphCommand::DeleteNode { .. } => "delete_node",
            GraphCommand::DeleteRelationship { .. } => "delete_relationship",
            GraphCommand::CreateIndex { .. } => "create_index",
            GraphCommand::DropIndex { .. } => "drop_index",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_deserializes_from_definition() {
        let command: GraphCommand = serde_json::from_value(json!({
            "op": "rename_property",
            "label": "Case",
            "from": "number",
            "to": "case_number"
        }))
        .unwrap();

        assert_eq!(
            command,
            GraphCommand::RenameProperty {
                label: EntityType::Case,
                from: "number".into(),
                to: "case_number".into(),
            }
        );
    }

    #[test]
    fn test_unknown_label_rejected_at_parse_time() {
        let parsed: Result<GraphQuery, _> = serde_json::from_value(json!({
            "kind": "orphan_nodes",
            "label": "Secrets"
        }));
        assert!(parsed.is_err());
    }

    #[test]
    fn test_injected_property_rejected() {
        let query = GraphQuery::NodesMissingProperty {
            label: EntityType::Case,
            property: "x` OR 1=1".into(),
        };
        assert!(query.validate().is_err());
    }
}
