use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use uuid::Uuid;

use super::query::{GraphCommand, GraphQuery};
use super::types::{validate_identifier, ClearScope, EntityType, NodeRecord, RelationshipRecord, Row, StoreStats};
use super::{GraphStore, StoreError, StoreResult};

/// In-memory property graph
///
/// Reference implementation of [`GraphStore`] used by tests, local tooling and
/// as a stand-in secondary site. Cloning shares the underlying data.
#[derive(Clone)]
pub struct MemoryGraphStore {
    name: String,
    nodes: Arc<DashMap<String, NodeRecord>>,
    relationships: Arc<DashMap<String, RelationshipRecord>>,
    indexes: Arc<RwLock<BTreeSet<(EntityType, String)>>>,
    available: Arc<AtomicBool>,
}

impl MemoryGraphStore {
    /// Create an empty, available store
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Arc::new(DashMap::new()),
            relationships: Arc::new(DashMap::new()),
            indexes: Arc::new(RwLock::new(BTreeSet::new())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulate an outage (every call fails with `Unavailable`) or recovery
    pub fn set_available(&self, available: bool) {
        self.available.store(available, AtomicOrdering::SeqCst);
    }

    /// Bulk-load a node keeping its id and timestamp
    pub fn insert_node(&self, node: NodeRecord) {
        self.nodes.insert(node.id.clone(), node);
    }

    /// Bulk-load a relationship without checking its endpoints, the way edge
    /// files can be imported ahead of their nodes
    pub fn insert_relationship_unchecked(&self, relationship: RelationshipRecord) {
        self.relationships.insert(relationship.id.clone(), relationship);
    }

    /// All nodes and relationships sorted by id
    pub fn snapshot(&self) -> (Vec<NodeRecord>, Vec<RelationshipRecord>) {
        let mut nodes: Vec<NodeRecord> = self.nodes.iter().map(|e| e.value().clone()).collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        let mut rels: Vec<RelationshipRecord> =
            self.relationships.iter().map(|e| e.value().clone()).collect();
        rels.sort_by(|a, b| a.id.cmp(&b.id));
        (nodes, rels)
    }

    /// Node by id
    pub fn get_node(&self, id: &str) -> Option<NodeRecord> {
        self.nodes.get(id).map(|e| e.value().clone())
    }

    /// Whether an index exists on `label.property`
    pub fn has_index(&self, label: EntityType, property: &str) -> bool {
        self.indexes.read().contains(&(label, property.to_string()))
    }

    fn ensure_available(&self) -> StoreResult<()> {
        if self.available.load(AtomicOrdering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable(format!("store '{}' is offline", self.name)))
        }
    }

    fn nodes_with_label(&self, label: EntityType) -> Vec<NodeRecord> {
        let mut nodes: Vec<NodeRecord> = self
            .nodes
            .iter()
            .filter(|e| e.value().is_a(label))
            .map(|e| e.value().clone())
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    /// Apply `mutate` to every node of `label`; returns how many it changed
    fn update_labelled<F>(&self, label: EntityType, mut mutate: F) -> u64
    where
        F: FnMut(&mut NodeRecord) -> bool,
    {
        let now = Utc::now();
        let mut affected = 0;
        for mut entry in self.nodes.iter_mut() {
            let node = entry.value_mut();
            if node.is_a(label) && mutate(node) {
                node.modified_at = Some(now);
                affected += 1;
            }
        }
        affected
    }

    fn detach_delete(&self, node_id: &str) -> bool {
        if self.nodes.remove(node_id).is_none() {
            return false;
        }
        self.relationships
            .retain(|_, rel| rel.start_id != node_id && rel.end_id != node_id);
        true
    }

    fn node_row(node_id: &str) -> Row {
        let mut row = Map::new();
        row.insert("node_id".to_string(), json!(node_id));
        row
    }
}

/// Order two property values: numbers numerically, RFC 3339 timestamps
/// chronologically, anything else as strings
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => {
            match (
                DateTime::parse_from_rfc3339(x),
                DateTime::parse_from_rfc3339(y),
            ) {
                (Ok(dx), Ok(dy)) => Some(dx.cmp(&dy)),
                _ => Some(x.cmp(y)),
            }
        }
        _ => None,
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ping(&self) -> StoreResult<()> {
        self.ensure_available()
    }

    async fn stats(&self) -> StoreResult<StoreStats> {
        self.ensure_available()?;
        let mut stats = StoreStats {
            node_count: self.nodes.len() as u64,
            relationship_count: self.relationships.len() as u64,
            ..Default::default()
        };
        for entry in self.nodes.iter() {
            for label in &entry.value().labels {
                *stats.label_counts.entry(label.clone()).or_insert(0) += 1;
            }
        }
        Ok(stats)
    }

    async fn export_nodes(
        &self,
        label: Option<EntityType>,
        modified_since: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<NodeRecord>> {
        self.ensure_available()?;
        let mut nodes: Vec<NodeRecord> = self
            .nodes
            .iter()
            .map(|e| e.value().clone())
            .filter(|n| label.map_or(true, |l| n.is_a(l)))
            .filter(|n| match modified_since {
                // Nodes without a timestamp fall outside any "modified since" window
                Some(since) => n.modified_at.map_or(false, |m| m >= since),
                None => true,
            })
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(nodes)
    }

    async fn export_relationships(
        &self,
        modified_since: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<RelationshipRecord>> {
        self.ensure_available()?;
        let mut rels: Vec<RelationshipRecord> = self
            .relationships
            .iter()
            .map(|e| e.value().clone())
            .filter(|r| match modified_since {
                Some(since) => r.modified_at.map_or(false, |m| m >= since),
                None => true,
            })
            .collect();
        rels.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rels)
    }

    async fn create_node(
        &self,
        labels: &[String],
        properties: Map<String, Value>,
    ) -> StoreResult<String> {
        self.ensure_available()?;
        for label in labels {
            validate_identifier(label)?;
        }
        let id = Uuid::new_v4().to_string();
        self.nodes.insert(
            id.clone(),
            NodeRecord {
                id: id.clone(),
                labels: labels.to_vec(),
                properties,
                modified_at: Some(Utc::now()),
            },
        );
        Ok(id)
    }

    async fn create_relationship(
        &self,
        start_id: &str,
        end_id: &str,
        rel_type: &str,
        properties: Map<String, Value>,
    ) -> StoreResult<String> {
        self.ensure_available()?;
        validate_identifier(rel_type)?;
        for endpoint in [start_id, end_id] {
            if !self.nodes.contains_key(endpoint) {
                return Err(StoreError::NodeNotFound(endpoint.to_string()));
            }
        }
        let id = Uuid::new_v4().to_string();
        self.relationships.insert(
            id.clone(),
            RelationshipRecord {
                id: id.clone(),
                rel_type: rel_type.to_string(),
                start_id: start_id.to_string(),
                end_id: end_id.to_string(),
                properties,
                modified_at: Some(Utc::now()),
            },
        );
        Ok(id)
    }

    async fn clear(&self, scope: &ClearScope) -> StoreResult<u64> {
        self.ensure_available()?;
        match scope {
            ClearScope::All => {
                let removed = self.nodes.len() as u64;
                self.relationships.clear();
                self.nodes.clear();
                Ok(removed)
            }
            ClearScope::Nodes(ids) => {
                let removed = ids.iter().filter(|id| self.detach_delete(id)).count();
                Ok(removed as u64)
            }
        }
    }

    async fn query(&self, query: &GraphQuery) -> StoreResult<Vec<Row>> {
        self.ensure_available()?;
        query.validate()?;

        let rows = match query {
            GraphQuery::CountNodes { label } => {
                let count = match label {
                    Some(l) => self.nodes.iter().filter(|e| e.value().is_a(*l)).count(),
                    None => self.nodes.len(),
                };
                let mut row = Map::new();
                row.insert("count".to_string(), json!(count));
                vec![row]
            }
            GraphQuery::NodesMissingProperty { label, property } => self
                .nodes_with_label(*label)
                .into_iter()
                .filter(|n| n.properties.get(property).map_or(true, Value::is_null))
                .map(|n| Self::node_row(&n.id))
                .collect(),
            GraphQuery::NodesWithInvalidValue {
                label,
                property,
                allowed,
            } => self
                .nodes_with_label(*label)
                .into_iter()
                .filter_map(|n| {
                    let value = n.properties.get(property)?;
                    if value.is_null() || allowed.contains(value) {
                        return None;
                    }
                    let mut row = Self::node_row(&n.id);
                    row.insert("property".to_string(), json!(property));
                    row.insert("value".to_string(), value.clone());
                    Some(row)
                })
                .collect(),
            GraphQuery::DuplicatePropertyValues { label, property } => {
                let nodes = self.nodes_with_label(*label);
                let mut groups: HashMap<String, Vec<(String, Value)>> = HashMap::new();
                for node in &nodes {
                    if let Some(value) = node.properties.get(property) {
                        if !value.is_null() {
                            groups
                                .entry(value.to_string())
                                .or_default()
                                .push((node.id.clone(), value.clone()));
                        }
                    }
                }
                let mut rows = Vec::new();
                for members in groups.values().filter(|m| m.len() > 1) {
                    for (node_id, value) in members {
                        let mut row = Self::node_row(node_id);
                        row.insert("property".to_string(), json!(property));
                        row.insert("value".to_string(), value.clone());
                        row.insert("duplicate_count".to_string(), json!(members.len()));
                        rows.push(row);
                    }
                }
                rows.sort_by(|a, b| a["node_id"].to_string().cmp(&b["node_id"].to_string()));
                rows
            }
            GraphQuery::OrphanNodes { label } => {
                let connected: HashSet<String> = self
                    .relationships
                    .iter()
                    .flat_map(|e| [e.value().start_id.clone(), e.value().end_id.clone()])
                    .collect();
                self.nodes_with_label(*label)
                    .into_iter()
                    .filter(|n| !connected.contains(&n.id))
                    .map(|n| Self::node_row(&n.id))
                    .collect()
            }
            GraphQuery::DanglingRelationships => {
                let mut rows: Vec<Row> = self
                    .relationships
                    .iter()
                    .filter_map(|e| {
                        let rel = e.value();
                        let missing = if !self.nodes.contains_key(&rel.start_id) {
                            "start"
                        } else if !self.nodes.contains_key(&rel.end_id) {
                            "end"
                        } else {
                            return None;
                        };
                        let mut row = Map::new();
                        row.insert("relationship_id".to_string(), json!(rel.id));
                        row.insert("rel_type".to_string(), json!(rel.rel_type));
                        row.insert("start_id".to_string(), json!(rel.start_id));
                        row.insert("end_id".to_string(), json!(rel.end_id));
                        row.insert("missing_endpoint".to_string(), json!(missing));
                        Some(row)
                    })
                    .collect();
                rows.sort_by(|a, b| {
                    a["relationship_id"]
                        .to_string()
                        .cmp(&b["relationship_id"].to_string())
                });
                rows
            }
            GraphQuery::RelationshipEndpointMismatch {
                rel_type,
                start_label,
                end_label,
            } => {
                let rels: Vec<RelationshipRecord> = self
                    .relationships
                    .iter()
                    .filter(|e| &e.value().rel_type == rel_type)
                    .map(|e| e.value().clone())
                    .collect();
                rels.into_iter()
                    .filter(|rel| {
                        let start_ok = self
                            .nodes
                            .get(&rel.start_id)
                            .map_or(true, |n| n.is_a(*start_label));
                        let end_ok = self
                            .nodes
                            .get(&rel.end_id)
                            .map_or(true, |n| n.is_a(*end_label));
                        !(start_ok && end_ok)
                    })
                    .map(|rel| {
                        let mut row = Map::new();
                        row.insert("relationship_id".to_string(), json!(rel.id));
                        row.insert("start_id".to_string(), json!(rel.start_id));
                        row.insert("end_id".to_string(), json!(rel.end_id));
                        row
                    })
                    .collect()
            }
            GraphQuery::PropertyOrderViolation {
                label,
                earlier,
                later,
            } => self
                .nodes_with_label(*label)
                .into_iter()
                .filter_map(|n| {
                    let a = n.properties.get(earlier)?;
                    let b = n.properties.get(later)?;
                    if compare_values(a, b)? != Ordering::Greater {
                        return None;
                    }
                    let mut row = Self::node_row(&n.id);
                    row.insert(earlier.clone(), a.clone());
                    row.insert(later.clone(), b.clone());
                    Some(row)
                })
                .collect(),
            GraphQuery::NodesWithProperty {
                label,
                property,
                value,
            } => self
                .nodes_with_label(*label)
                .into_iter()
                .filter(|n| match (n.properties.get(property), value) {
                    (Some(actual), Some(expected)) => actual == expected,
                    (Some(actual), None) => !actual.is_null(),
                    (None, _) => false,
                })
                .map(|n| Self::node_row(&n.id))
                .collect(),
            GraphQuery::IndexExists { label, property } => {
                let mut row = Map::new();
                row.insert("valid".to_string(), json!(self.has_index(*label, property)));
                vec![row]
            }
        };

        Ok(rows)
    }

    async fn execute(&self, command: &GraphCommand) -> StoreResult<u64> {
        self.ensure_available()?;
        command.validate()?;

        let affected = match command {
            GraphCommand::SetProperty {
                label,
                property,
                value,
                only_if_missing,
            } => self.update_labelled(*label, |node| {
                if *only_if_missing && node.properties.contains_key(property) {
                    return false;
                }
                node.properties.insert(property.clone(), value.clone());
                true
            }),
            GraphCommand::RemoveProperty { label, property } => {
                self.update_labelled(*label, |node| node.properties.remove(property).is_some())
            }
            GraphCommand::RenameProperty { label, from, to } => {
                self.update_labelled(*label, |node| match node.properties.remove(from) {
                    Some(value) => {
                        node.properties.insert(to.clone(), value);
                        true
                    }
                    None => false,
                })
            }
            GraphCommand::AddLabel { label, new_label } => self.update_labelled(*label, |node| {
                if node.has_label(new_label) {
                    return false;
                }
                node.labels.push(new_label.clone());
                true
            }),
            GraphCommand::RemoveLabel { label, removed } => {
                if removed == label.label() {
                    return Err(StoreError::QueryFailed(format!(
                        "cannot remove the selecting label '{}'",
                        removed
                    )));
                }
                self.update_labelled(*label, |node| {
                    let before = node.labels.len();
                    node.labels.retain(|l| l != removed);
                    node.labels.len() != before
                })
            }
            GraphCommand::SetNodeProperty {
                node_id,
                property,
                value,
            } => {
                let mut node = self
                    .nodes
                    .get_mut(node_id)
                    .ok_or_else(|| StoreError::NodeNotFound(node_id.clone()))?;
                node.properties.insert(property.clone(), value.clone());
                node.modified_at = Some(Utc::now());
                1
            }
            GraphCommand::RemoveNodeProperty { node_id, property } => {
                let mut node = self
                    .nodes
                    .get_mut(node_id)
                    .ok_or_else(|| StoreError::NodeNotFound(node_id.clone()))?;
                if node.properties.remove(property).is_some() {
                    node.modified_at = Some(Utc::now());
                    1
                } else {
                    0
                }
            }
            GraphCommand::DeleteNode { node_id } => {
                if !self.detach_delete(node_id) {
                    return Err(StoreError::NodeNotFound(node_id.clone()));
                }
                1
            }
            GraphCommand::DeleteRelationship { relationship_id } => {
                if self.relationships.remove(relationship_id).is_none() {
                    return Err(StoreError::RelationshipNotFound(relationship_id.clone()));
                }
                1
            }
            GraphCommand::CreateIndex { label, property } => {
                u64::from(self.indexes.write().insert((*label, property.clone())))
            }
            GraphCommand::DropIndex { label, property } => {
                u64::from(self.indexes.write().remove(&(*label, property.clone())))
            }
        };

        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_create_and_export() {
        let store = MemoryGraphStore::new("test");
        let case = store
            .create_node(&["Case".into()], props(json!({"case_number": "C-1"})))
            .await
            .unwrap();
        let person = store
            .create_node(&["Person".into()], props(json!({"name": "Ada"})))
            .await
            .unwrap();
        store
            .create_relationship(&case, &person, "INVOLVES", Map::new())
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.node_count, 2);
        assert_eq!(stats.relationship_count, 1);
        assert_eq!(stats.label_counts.get("Case"), Some(&1));

        let cases = store.export_nodes(Some(EntityType::Case), None).await.unwrap();
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].properties["case_number"], json!("C-1"));
    }

    #[tokio::test]
    async fn test_relationship_requires_endpoints() {
        let store = MemoryGraphStore::new("test");
        let result = store
            .create_relationship("missing-a", "missing-b", "INVOLVES", Map::new())
            .await;
        assert!(matches!(result, Err(StoreError::NodeNotFound(_))));
    }

    #[tokio::test]
    async fn test_dangling_relationship_query() {
        let store = MemoryGraphStore::new("test");
        let case = store.create_node(&["Case".into()], Map::new()).await.unwrap();
        store.insert_relationship_unchecked(RelationshipRecord {
            id: "r1".into(),
            rel_type: "HAS_DOCUMENT".into(),
            start_id: case,
            end_id: "gone".into(),
            properties: Map::new(),
            modified_at: None,
        });

        let rows = store.query(&GraphQuery::DanglingRelationships).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["missing_endpoint"], json!("end"));
    }

    #[tokio::test]
    async fn test_rename_property_round_trip() {
        let store = MemoryGraphStore::new("test");
        store
            .create_node(&["Case".into()], props(json!({"number": "C-9"})))
            .await
            .unwrap();

        let forward = GraphCommand::RenameProperty {
            label: EntityType::Case,
            from: "number".into(),
            to: "case_number".into(),
        };
        assert_eq!(store.execute(&forward).await.unwrap(), 1);

        let missing = store
            .query(&GraphQuery::NodesMissingProperty {
                label: EntityType::Case,
                property: "case_number".into(),
            })
            .await
            .unwrap();
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn test_property_order_violation_uses_timestamps() {
        let store = MemoryGraphStore::new("test");
        store
            .create_node(
                &["Event".into()],
                props(json!({
                    "start_date": "2024-05-02T00:00:00Z",
                    "end_date": "2024-05-01T00:00:00Z"
                })),
            )
            .await
            .unwrap();

        let rows = store
            .query(&GraphQuery::PropertyOrderViolation {
                label: EntityType::Event,
                earlier: "start_date".into(),
                later: "end_date".into(),
            })
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_offline_store_rejects_calls() {
        let store = MemoryGraphStore::new("offline");
        store.set_available(false);
        assert!(matches!(store.ping().await, Err(StoreError::Unavailable(_))));
        assert!(store.stats().await.is_err());
    }

    #[tokio::test]
    async fn test_clear_nodes_scope_detaches() {
        let store = MemoryGraphStore::new("test");
        let a = store.create_node(&["Case".into()], Map::new()).await.unwrap();
        let b = store.create_node(&["Person".into()], Map::new()).await.unwrap();
        store.create_relationship(&a, &b, "INVOLVES", Map::new()).await.unwrap();

        let removed = store.clear(&ClearScope::Nodes(vec![a.clone()])).await.unwrap();
        assert_eq!(removed, 1);
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.node_count, 1);
        assert_eq!(stats.relationship_count, 0);
    }
}
