use crate::models::{parse_timestamp, DetectionId, DetectionKind, DetectionRecord, Severity};
use crate::services::alert_service::AlertService;
use crate::services::severity::classify_record;
use async_trait::async_trait;
use chrono::Utc;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Confidence assumed for push events that only carry a tier
const DEFAULT_PUSH_CONFIDENCE: f64 = 0.5;

/// Alert event as delivered by the push channel.
///
/// Delivery is at-least-once and unordered; `id` is the dedup key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEvent {
    pub id: Option<DetectionId>,
    #[serde(alias = "type")]
    pub detection_type: Option<String>,
    pub confidence: Option<f64>,
    pub timestamp: Option<String>,
    #[serde(alias = "camera_location")]
    pub location: Option<String>,
    /// Coarse upstream tier ("high", "medium", "low")
    pub severity: Option<String>,
}

impl PushEvent {
    /// Normalize into a record plus its severity.
    ///
    /// Events without an id cannot be deduplicated and are rejected. A missing
    /// timestamp means "now"; an unparseable one leaves the record undated.
    pub fn into_record(self) -> Option<(DetectionRecord, Severity)> {
        let id = self.id?;
        let severity = classify_record(self.confidence, self.severity.as_deref());
        let timestamp = match self.timestamp.as_deref() {
            Some(raw) => {
                let parsed = parse_timestamp(raw);
                if parsed.is_none() {
                    warn!("Push event {} has unparseable timestamp {:?}", id, raw);
                }
                parsed
            }
            None => Some(Utc::now()),
        };
        let kind = DetectionKind::from_label(self.detection_type.as_deref().unwrap_or("unknown"));

        let record = DetectionRecord::new(
            id,
            kind,
            self.confidence.unwrap_or(DEFAULT_PUSH_CONFIDENCE),
            timestamp,
            self.location,
        );
        Some((record, severity))
    }
}

/// Source of push-delivered alert events
#[async_trait]
pub trait PushSource: Send {
    /// Next event, or `None` once the source is exhausted
    async fn next_event(&mut self) -> Option<PushEvent>;
}

/// Push source fed through an in-process channel
pub struct ChannelPushSource {
    receiver: mpsc::Receiver<PushEvent>,
}

impl ChannelPushSource {
    pub fn new(receiver: mpsc::Receiver<PushEvent>) -> Self {
        Self { receiver }
    }
}

/// Sender half plus the matching source
pub fn push_channel(buffer: usize) -> (mpsc::Sender<PushEvent>, ChannelPushSource) {
    let (sender, receiver) = mpsc::channel(buffer.max(1));
    (sender, ChannelPushSource::new(receiver))
}

#[async_trait]
impl PushSource for ChannelPushSource {
    async fn next_event(&mut self) -> Option<PushEvent> {
        self.receiver.recv().await
    }
}

/// Forwards push events into the alert feed until the source ends
pub struct PushListener;

impl PushListener {
    pub fn spawn(source: Box<dyn PushSource>, alerts: Arc<AlertService>) -> JoinHandle<()> {
        tokio::spawn(Self::run(source, alerts))
    }

    /// Drain `source` on the calling task. Dropping the future drops the source.
    pub async fn run(mut source: Box<dyn PushSource>, alerts: Arc<AlertService>) {
        info!("Push listener started");
        while let Some(event) = source.next_event().await {
            alerts.ingest_push(event).await;
        }
        info!("Push listener stopped: source closed");
    }
}
