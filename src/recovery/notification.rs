// Notifications - outbound disaster payloads

use super::types::{ImpactSeverity, Notification};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Delivery channel for disaster notifications (email, SMS, chat...)
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Writes notifications to the tracing log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotificationSink;

#[async_trait]
impl NotificationSink for TracingNotificationSink {
    async fn notify(&self, n: &Notification) -> Result<()> {
        match n.severity {
            ImpactSeverity::Critical => error!(
                event_id = %n.event_id,
                disaster_type = %n.disaster_type,
                "{}", n.message
            ),
            ImpactSeverity::High => warn!(
                event_id = %n.event_id,
                disaster_type = %n.disaster_type,
                "{}", n.message
            ),
            ImpactSeverity::Medium | ImpactSeverity::Low => info!(
                event_id = %n.event_id,
                disaster_type = %n.disaster_type,
                "{}", n.message
            ),
        }
        Ok(())
    }
}

/// Keeps every notification in memory
#[derive(Debug, Default, Clone)]
pub struct RecordingNotificationSink {
    sent: Arc<RwLock<Vec<Notification>>>,
}

impl RecordingNotificationSink {
    /// Empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything sent so far
    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.read().await.clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotificationSink {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        self.sent.write().await.push(notification.clone());
        Ok(())
    }
}
