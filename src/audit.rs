//! Audit trail for security-relevant events
//!
//! Key lifecycle changes, forced decrypts, restores, rollbacks and disaster
//! declarations are recorded here in addition to the tracing log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Audit logger shared between components
#[derive(Clone)]
pub struct AuditLogger {
    /// In-memory event storage
    events: Arc<RwLock<Vec<AuditEvent>>>,
}

/// Audit event record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event type (e.g., "key_rotated", "backup_restored")
    pub event_type: String,

    /// Component that emitted the event
    pub component: String,

    /// Subject id (key, backup, migration or disaster event id)
    pub subject_id: String,

    /// When the event occurred
    pub timestamp: DateTime<Utc>,

    /// Additional event metadata
    pub metadata: HashMap<String, String>,
}

impl AuditLogger {
    /// Create a new audit logger
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Log an audit event
    pub async fn log_event(
        &self,
        event_type: impl Into<String>,
        component: impl Into<String>,
        subject_id: impl Into<String>,
        metadata: HashMap<String, String>,
    ) {
        let event = AuditEvent {
            event_type: event_type.into(),
            component: component.into(),
            subject_id: subject_id.into(),
            timestamp: Utc::now(),
            metadata,
        };

        info!(
            event_type = %event.event_type,
            component = %event.component,
            subject_id = %event.subject_id,
            "Audit event"
        );

        self.events.write().await.push(event);
    }

    /// Get all audit events
    pub async fn get_events(&self) -> Vec<AuditEvent> {
        self.events.read().await.clone()
    }

    /// Get events for a specific subject
    pub async fn get_subject_events(&self, subject_id: &str) -> Vec<AuditEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.subject_id == subject_id)
            .cloned()
            .collect()
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new()
    }
}
