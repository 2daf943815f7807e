use crate::audio::ToneEngine;
use crate::capture::DetectionSink;
use crate::detector::DetectionBackend;
use crate::error::Error;
use crate::messaging::push::PushEvent;
use crate::messaging::AlertEvents;
use crate::models::{Alert, AlertStatus, DetectionId, DetectionRecord, RecordOrigin, Severity};
use crate::services::alert_feed::{AlertFeed, IngestOutcome, SnapshotSummary};
use crate::services::severity::classify;
use crate::storage::AlertStore;
use anyhow::Result;
use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};

/// Shortest snapshot period; a zero period is raised to this
const MIN_SNAPSHOT_PERIOD: Duration = Duration::from_secs(1);

/// Where snapshots come from, remembered for manual retries
#[derive(Clone)]
struct SnapshotSource {
    backend: Arc<dyn DetectionBackend>,
    limit: usize,
}

/// Owns the alert feed and fans every change out to storage, the broker and the tone engine
pub struct AlertService {
    feed: Mutex<AlertFeed>,
    events: AlertEvents,
    tones: Arc<ToneEngine>,
    store: Option<AlertStore>,
    persist_lock: Mutex<()>,
    snapshot_source: RwLock<Option<SnapshotSource>>,
    last_error: RwLock<Option<String>>,
}

impl AlertService {
    pub fn new(capacity: usize, events: AlertEvents, tones: Arc<ToneEngine>) -> Self {
        Self {
            feed: Mutex::new(AlertFeed::new(capacity)),
            events,
            tones,
            store: None,
            persist_lock: Mutex::new(()),
            snapshot_source: RwLock::new(None),
            last_error: RwLock::new(None),
        }
    }

    /// Persist local alerts to `store`
    pub fn with_store(mut self, store: AlertStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn tones(&self) -> &Arc<ToneEngine> {
        &self.tones
    }

    /// Load persisted local alerts into the feed
    pub async fn restore(&self) -> usize {
        let Some(store) = &self.store else {
            return 0;
        };

        let alerts = store.load().await;
        let restored = self.feed.lock().await.restore(alerts);
        if restored > 0 {
            info!("Restored {} alerts from {:?}", restored, store.path());
        }
        restored
    }

    /// Promote records produced by the capture loop. Plays one cue for the
    /// most severe alert that was actually added.
    pub async fn handle_detections(&self, records: Vec<DetectionRecord>) -> Vec<Alert> {
        let added = {
            let mut feed = self.feed.lock().await;
            let mut added = Vec::new();
            for record in records {
                let id = record.id.clone();
                let severity = classify(record.confidence);
                if feed.ingest_with_severity(record, severity, RecordOrigin::Local) == IngestOutcome::Added {
                    if let Some(alert) = feed.get(&id) {
                        added.push(alert.clone());
                    }
                }
            }
            added
        };

        if added.is_empty() {
            return added;
        }

        debug!("Capture produced {} new alerts", added.len());
        self.persist().await;
        for alert in &added {
            self.publish_raised(alert).await;
        }
        if let Some(severity) = added.iter().map(|a| a.severity).max() {
            self.tones.play_cue(severity);
        }

        added
    }

    /// Apply one push-delivered event. Redeliveries are no-ops.
    pub async fn ingest_push(&self, event: PushEvent) -> Option<IngestOutcome> {
        let Some((record, severity)) = event.into_record() else {
            warn!("Dropping push event without an id");
            return None;
        };

        let id = record.id.clone();
        let (outcome, alert) = {
            let mut feed = self.feed.lock().await;
            let outcome = feed.ingest_with_severity(record, severity, RecordOrigin::Push);
            (outcome, feed.get(&id).cloned())
        };

        match (outcome, alert) {
            (IngestOutcome::Added, Some(alert)) => {
                self.publish_raised(&alert).await;
                self.tones.play_cue(alert.severity);
            }
            (IngestOutcome::Duplicate, _) => debug!("Push event {} already in feed", id),
            _ => debug!("Push event {} too old for the feed", id),
        }

        Some(outcome)
    }

    /// Merge an authoritative backend snapshot
    pub async fn ingest_snapshot(&self, records: Vec<DetectionRecord>) -> SnapshotSummary {
        let (summary, unread) = {
            let mut feed = self.feed.lock().await;
            let summary = feed.ingest_snapshot(records);
            (summary, feed.unread_count())
        };

        // The store only holds local alerts
        if summary.local_removed > 0 {
            self.persist().await;
        }
        if let Err(e) = self.events.feed_reconciled(&summary, unread).await {
            warn!("Failed to publish feed reconciliation: {}", e);
        }
        summary
    }

    /// Fetch and merge a snapshot. A failure sets the banner; the feed is untouched.
    pub async fn refresh_snapshot(&self, backend: &dyn DetectionBackend, limit: usize) -> Result<SnapshotSummary> {
        match backend.history(limit).await {
            Ok(records) => {
                *self.last_error.write().await = None;
                Ok(self.ingest_snapshot(records).await)
            }
            Err(e) => {
                *self.last_error.write().await = Some(format!("Failed to fetch detections: {}", e));
                Err(e)
            }
        }
    }

    /// Poll `backend` for snapshots every `period`
    pub fn start_snapshot_poller(
        self: Arc<Self>,
        backend: Arc<dyn DetectionBackend>,
        period: Duration,
        limit: usize,
    ) -> JoinHandle<()> {
        let period = if period.is_zero() {
            warn!("Snapshot period is zero, using {:?}", MIN_SNAPSHOT_PERIOD);
            MIN_SNAPSHOT_PERIOD
        } else {
            period
        };
        info!("Starting snapshot poller every {} seconds", period.as_secs());

        tokio::spawn(async move {
            *self.snapshot_source.write().await = Some(SnapshotSource {
                backend: backend.clone(),
                limit,
            });

            let mut interval = interval(period);
            loop {
                interval.tick().await;

                if let Err(e) = self.refresh_snapshot(backend.as_ref(), limit).await {
                    error!("Error refreshing alert snapshot: {}", e);
                }
            }
        })
    }

    /// Manual retry behind the error banner
    pub async fn retry_snapshot(&self) -> Result<SnapshotSummary> {
        let source = self
            .snapshot_source
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::Internal("No snapshot source configured".to_string()))?;

        self.refresh_snapshot(source.backend.as_ref(), source.limit).await
    }

    /// Banner text while the last snapshot fetch failed
    pub async fn last_error(&self) -> Option<String> {
        self.last_error.read().await.clone()
    }

    pub async fn acknowledge(&self, id: &DetectionId) -> bool {
        self.transition(id, AlertFeed::acknowledge).await
    }

    pub async fn investigate(&self, id: &DetectionId) -> bool {
        self.transition(id, AlertFeed::investigate).await
    }

    pub async fn resolve(&self, id: &DetectionId) -> bool {
        self.transition(id, AlertFeed::resolve).await
    }

    pub async fn acknowledge_all(&self) -> usize {
        let changed = self.feed.lock().await.acknowledge_all();
        if changed > 0 {
            self.persist().await;
            if let Err(e) = self.events.alerts_acknowledged(changed).await {
                warn!("Failed to publish acknowledge-all: {}", e);
            }
        }
        changed
    }

    async fn transition(&self, id: &DetectionId, apply: fn(&mut AlertFeed, &DetectionId) -> bool) -> bool {
        let change = {
            let mut feed = self.feed.lock().await;
            let Some(old) = feed.get(id).map(|a| a.status) else {
                return false;
            };
            if !apply(&mut *feed, id) {
                return false;
            }
            feed.get(id).map(|a| (old, a.status, a.origin))
        };

        let Some((old, new, origin)) = change else {
            return false;
        };

        if origin == RecordOrigin::Local {
            self.persist().await;
        }
        if let Err(e) = self.events.alert_status_changed(id, old, new).await {
            warn!("Failed to publish status change: {}", e);
        }
        true
    }

    /// Current feed, newest first
    pub async fn feed(&self) -> Vec<Alert> {
        self.feed.lock().await.alerts().to_vec()
    }

    pub async fn unread_count(&self) -> usize {
        self.feed.lock().await.unread_count()
    }

    pub async fn counts_by_severity(&self) -> Vec<(Severity, usize)> {
        self.feed.lock().await.counts_by_severity()
    }

    pub async fn filter(&self, severity: Option<Severity>) -> Vec<Alert> {
        self.feed
            .lock()
            .await
            .filter(severity)
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn status_of(&self, id: &DetectionId) -> Option<AlertStatus> {
        self.feed.lock().await.get(id).map(|a| a.status)
    }

    async fn publish_raised(&self, alert: &Alert) {
        if let Err(e) = self.events.alert_raised(alert).await {
            warn!("Failed to publish alert {}: {}", alert.id(), e);
        }
    }

    async fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };

        // Serialize writers and always save the newest feed state
        let _guard = self.persist_lock.lock().await;
        let alerts = self.feed.lock().await.alerts().to_vec();
        if let Err(e) = store.save(&alerts).await {
            warn!("Failed to persist alerts: {}", e);
        }
    }
}

#[async_trait]
impl DetectionSink for AlertService {
    async fn handle_detections(&self, records: Vec<DetectionRecord>) {
        AlertService::handle_detections(self, records).await;
    }
}
