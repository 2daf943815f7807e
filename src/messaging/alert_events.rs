use crate::messaging::{broker::{EventBroker, MessageBrokerTrait}, EventType};
use crate::models::{Alert, AlertStatus, DetectionId, ModelSelection};
use crate::services::alert_feed::SnapshotSummary;
use anyhow::Result;
use log::debug;
use std::sync::Arc;
use uuid::Uuid;

/// Helper for publishing alert and capture events
#[derive(Clone)]
pub struct AlertEvents {
    message_broker: Arc<EventBroker>,
}

impl AlertEvents {
    pub fn new(message_broker: Arc<EventBroker>) -> Self {
        Self { message_broker }
    }

    pub fn broker(&self) -> &Arc<EventBroker> {
        &self.message_broker
    }

    /// Publish an alert raised event. The payload carries the full record.
    pub async fn alert_raised(&self, alert: &Alert) -> Result<()> {
        let payload = serde_json::json!({
            "record": alert.record,
            "severity": alert.severity,
            "status": alert.status,
            "origin": alert.origin,
        });

        self.message_broker
            .publish(EventType::AlertRaised, None, payload)
            .await?;

        debug!("Published alert raised event for {}", alert.id());
        Ok(())
    }

    /// Publish an alert status changed event
    pub async fn alert_status_changed(&self, id: &DetectionId, old_status: AlertStatus, new_status: AlertStatus) -> Result<()> {
        let payload = serde_json::json!({
            "id": id,
            "old_status": old_status,
            "new_status": new_status,
        });

        self.message_broker
            .publish(EventType::AlertStatusChanged, None, payload)
            .await?;

        debug!("Published alert status changed event for {}: {} -> {}", id, old_status, new_status);
        Ok(())
    }

    pub async fn alerts_acknowledged(&self, count: usize) -> Result<()> {
        self.message_broker
            .publish(EventType::AlertsAcknowledged, None, serde_json::json!({ "count": count }))
            .await
    }

    pub async fn feed_reconciled(&self, summary: &SnapshotSummary, unread: usize) -> Result<()> {
        let payload = serde_json::json!({
            "received": summary.received,
            "added": summary.added,
            "retained": summary.retained,
            "dropped": summary.dropped,
            "evicted": summary.evicted,
            "unread": unread,
        });

        self.message_broker
            .publish(EventType::FeedReconciled, None, payload)
            .await
    }

    pub async fn capture_started(&self, session_id: Uuid, model: &ModelSelection) -> Result<()> {
        let payload = serde_json::json!({
            "session_id": session_id.to_string(),
            "model": model,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        self.message_broker
            .publish(EventType::CaptureStarted, Some(session_id), payload)
            .await
    }

    pub async fn capture_stopped(&self, session_id: Uuid) -> Result<()> {
        let payload = serde_json::json!({
            "session_id": session_id.to_string(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        self.message_broker
            .publish(EventType::CaptureStopped, Some(session_id), payload)
            .await
    }

    pub async fn detection_failed(&self, session_id: Uuid, reason: &str) -> Result<()> {
        let payload = serde_json::json!({
            "session_id": session_id.to_string(),
            "reason": reason,
        });

        self.message_broker
            .publish(EventType::DetectionFailed, Some(session_id), payload)
            .await
    }
}
