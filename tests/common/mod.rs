// Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use safeguard::store::{
    ClearScope, EntityType, GraphCommand, GraphQuery, GraphStore, MemoryGraphStore, NodeRecord,
    RelationshipRecord, Row, StoreResult, StoreStats,
};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

pub fn props(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

/// Two clients, three cases, documents and a task, all linked
pub async fn seeded_store(name: &str) -> Arc<MemoryGraphStore> {
    let store = Arc::new(MemoryGraphStore::new(name));

    let alice = store
        .create_node(&["Client".into()], props(json!({"name": "Alice Moreno", "retention_until": "2031-01-01"})))
        .await
        .expect("client");
    let bob = store
        .create_node(&["Client".into()], props(json!({"name": "Bob Lee", "retention_until": "2030-06-30"})))
        .await
        .expect("client");

    let mut cases = Vec::new();
    for (number, client) in [("C-1001", &alice), ("C-1002", &alice), ("C-1003", &bob)] {
        let case = store
            .create_node(
                &["Case".into()],
                props(json!({
                    "case_number": number,
                    "status": "open",
                    "opened_at": "2025-01-10T09:00:00Z"
                })),
            )
            .await
            .expect("case");
        store
            .create_relationship(client, &case, "CLIENT_OF", Map::new())
            .await
            .expect("client link");
        cases.push(case);
    }

    for (i, case) in cases.iter().enumerate() {
        let doc = store
            .create_node(
                &["Document".into()],
                props(json!({"title": format!("Intake form {}", i + 1), "classification": "confidential"})),
            )
            .await
            .expect("document");
        store
            .create_relationship(case, &doc, "HAS_DOCUMENT", Map::new())
            .await
            .expect("document link");
    }

    let user = store
        .create_node(&["User".into()], props(json!({"name": "paralegal"})))
        .await
        .expect("user");
    let task = store
        .create_node(&["Task".into()], props(json!({"title": "File motion"})))
        .await
        .expect("task");
    store
        .create_relationship(&task, &user, "ASSIGNED_TO", Map::new())
        .await
        .expect("assignment");
    store
        .create_relationship(&cases[0], &task, "HAS_TASK", Map::new())
        .await
        .expect("case task");

    store
}

pub fn label_count(store: &MemoryGraphStore, label: EntityType) -> usize {
    store
        .snapshot()
        .0
        .iter()
        .filter(|n| n.is_a(label))
        .count()
}

/// Delays exports and writes so that operations stay in flight
pub struct SlowStore {
    inner: Arc<MemoryGraphStore>,
    delay: Duration,
}

impl SlowStore {
    pub fn new(inner: Arc<MemoryGraphStore>, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl GraphStore for SlowStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn ping(&self) -> StoreResult<()> {
        self.inner.ping().await
    }

    async fn stats(&self) -> StoreResult<StoreStats> {
        self.inner.stats().await
    }

    async fn export_nodes(
        &self,
        label: Option<EntityType>,
        modified_since: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<NodeRecord>> {
        tokio::time::sleep(self.delay).await;
        self.inner.export_nodes(label, modified_since).await
    }

    async fn export_relationships(
        &self,
        modified_since: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<RelationshipRecord>> {
        self.inner.export_relationships(modified_since).await
    }

    async fn create_node(&self, labels: &[String], properties: Map<String, Value>) -> StoreResult<String> {
        self.inner.create_node(labels, properties).await
    }

    async fn create_relationship(
        &self,
        start_id: &str,
        end_id: &str,
        rel_type: &str,
        properties: Map<String, Value>,
    ) -> StoreResult<String> {
        self.inner
            .create_relationship(start_id, end_id, rel_type, properties)
            .await
    }

    async fn clear(&self, scope: &ClearScope) -> StoreResult<u64> {
        self.inner.clear(scope).await
    }

    async fn query(&self, query: &GraphQuery) -> StoreResult<Vec<Row>> {
        self.inner.query(query).await
    }

    async fn execute(&self, command: &GraphCommand) -> StoreResult<u64> {
        tokio::time::sleep(self.delay).await;
        self.inner.execute(command).await
    }
}
