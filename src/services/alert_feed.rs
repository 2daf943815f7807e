use crate::models::{Alert, AlertStatus, DetectionId, DetectionRecord, RecordOrigin, Severity};
use crate::services::severity::classify;
use log::debug;
use std::collections::{HashMap, HashSet};

/// Result of offering one record to the feed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// New alert, now part of the feed
    Added,
    /// An alert with this id already exists, nothing changed
    Duplicate,
    /// Inserted but immediately evicted as the oldest entry of a full feed
    Evicted,
}

/// Counters from one snapshot merge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotSummary {
    pub received: usize,
    pub added: usize,
    /// Push/local alerts absent from the snapshot that were kept
    pub retained: usize,
    /// Backend alerts absent from the snapshot that were dropped
    pub dropped: usize,
    pub evicted: usize,
    /// Local alerts that left the local set, adopted by the snapshot or evicted
    pub local_removed: usize,
}

/// Deduplicated, time-descending alert feed merged from backend snapshots,
/// push deltas and locally synthesized detections.
///
/// Invariants after every mutation: ids are unique, entries are ordered by
/// timestamp descending (undated entries last, ties in insertion order) and
/// the length never exceeds the capacity.
#[derive(Debug, Clone)]
pub struct AlertFeed {
    alerts: Vec<Alert>,
    capacity: usize,
    next_seq: u64,
}

impl AlertFeed {
    pub fn new(capacity: usize) -> Self {
        Self {
            alerts: Vec::new(),
            capacity: capacity.max(1),
            next_seq: 0,
        }
    }

    pub fn alerts(&self) -> &[Alert] {
        &self.alerts
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&self, id: &DetectionId) -> Option<&Alert> {
        self.alerts.iter().find(|a| a.id() == id)
    }

    pub fn contains(&self, id: &DetectionId) -> bool {
        self.get(id).is_some()
    }

    /// Alerts still waiting for a user: Active or Investigating
    pub fn unread_count(&self) -> usize {
        self.alerts.iter().filter(|a| a.status.is_unread()).count()
    }

    /// Alerts of one severity, or all of them, in feed order
    pub fn filter(&self, severity: Option<Severity>) -> Vec<&Alert> {
        self.alerts
            .iter()
            .filter(|a| severity.map_or(true, |s| a.severity == s))
            .collect()
    }

    /// Count per severity, Critical first
    pub fn counts_by_severity(&self) -> Vec<(Severity, usize)> {
        Severity::ALL
            .iter()
            .map(|s| (*s, self.alerts.iter().filter(|a| a.severity == *s).count()))
            .collect()
    }

    /// Replace the backend-origin subset with a fresh snapshot.
    ///
    /// Alerts already in the feed keep their status and severity. Push and
    /// local alerts missing from the snapshot are kept; backend alerts
    /// missing from it are dropped.
    pub fn ingest_snapshot(&mut self, records: Vec<DetectionRecord>) -> SnapshotSummary {
        let mut summary = SnapshotSummary {
            received: records.len(),
            ..Default::default()
        };

        let mut previous: HashMap<DetectionId, Alert> = self
            .alerts
            .drain(..)
            .map(|alert| (alert.id().clone(), alert))
            .collect();

        let mut seen = HashSet::new();
        let mut merged = Vec::with_capacity(records.len() + previous.len());

        for record in records {
            if !seen.insert(record.id.clone()) {
                continue;
            }
            match previous.remove(&record.id) {
                Some(mut existing) => {
                    if existing.origin == RecordOrigin::Local {
                        summary.local_removed += 1;
                    }
                    existing.origin = RecordOrigin::Backend;
                    merged.push(existing);
                }
                None => {
                    let severity = classify(record.confidence);
                    let mut alert = Alert::new(record, severity, RecordOrigin::Backend);
                    alert.seq = self.bump_seq();
                    merged.push(alert);
                    summary.added += 1;
                }
            }
        }

        for (_, alert) in previous {
            if alert.origin == RecordOrigin::Backend {
                summary.dropped += 1;
            } else {
                summary.retained += 1;
                merged.push(alert);
            }
        }

        self.alerts = merged;
        let evicted = self.normalize();
        summary.evicted = evicted.len();
        summary.local_removed += evicted
            .iter()
            .filter(|alert| alert.origin == RecordOrigin::Local)
            .count();

        debug!(
            "Snapshot merged: received={} added={} retained={} dropped={} evicted={}",
            summary.received, summary.added, summary.retained, summary.dropped, summary.evicted
        );

        summary
    }

    /// Idempotent append of a push-delivered record
    pub fn ingest_push(&mut self, record: DetectionRecord) -> IngestOutcome {
        let severity = classify(record.confidence);
        self.ingest_with_severity(record, severity, RecordOrigin::Push)
    }

    /// Idempotent append of a record synthesized by the capture loop
    pub fn ingest_local(&mut self, record: DetectionRecord) -> IngestOutcome {
        let severity = classify(record.confidence);
        self.ingest_with_severity(record, severity, RecordOrigin::Local)
    }

    /// Idempotent append with an already-derived severity
    pub fn ingest_with_severity(
        &mut self,
        record: DetectionRecord,
        severity: Severity,
        origin: RecordOrigin,
    ) -> IngestOutcome {
        let mut alert = Alert::new(record, severity, origin);
        alert.seq = self.bump_seq();
        self.insert(alert)
    }

    /// Put previously persisted alerts back, keeping their status
    pub fn restore(&mut self, alerts: Vec<Alert>) -> usize {
        alerts
            .into_iter()
            .map(|mut alert| {
                alert.seq = self.bump_seq();
                self.insert(alert)
            })
            .filter(|outcome| *outcome == IngestOutcome::Added)
            .count()
    }

    /// Active or Investigating -> Acknowledged. Unknown ids are ignored.
    pub fn acknowledge(&mut self, id: &DetectionId) -> bool {
        self.transition(id, |status| match status {
            AlertStatus::Active | AlertStatus::Investigating => Some(AlertStatus::Acknowledged),
            _ => None,
        })
    }

    /// Active -> Investigating
    pub fn investigate(&mut self, id: &DetectionId) -> bool {
        self.transition(id, |status| match status {
            AlertStatus::Active => Some(AlertStatus::Investigating),
            _ => None,
        })
    }

    /// Any state -> Resolved
    pub fn resolve(&mut self, id: &DetectionId) -> bool {
        self.transition(id, |status| match status {
            AlertStatus::Resolved => None,
            _ => Some(AlertStatus::Resolved),
        })
    }

    /// Acknowledge every unread alert, returning how many changed
    pub fn acknowledge_all(&mut self) -> usize {
        let mut changed = 0;
        for alert in self.alerts.iter_mut().filter(|a| a.status.is_unread()) {
            alert.status = AlertStatus::Acknowledged;
            changed += 1;
        }
        changed
    }

    fn transition<F>(&mut self, id: &DetectionId, next: F) -> bool
    where
        F: Fn(AlertStatus) -> Option<AlertStatus>,
    {
        match self.alerts.iter_mut().find(|a| a.id() == id) {
            Some(alert) => match next(alert.status) {
                Some(status) => {
                    debug!("Alert {}: {} -> {}", id, alert.status, status);
                    alert.status = status;
                    true
                }
                None => false,
            },
            None => false,
        }
    }

    fn insert(&mut self, alert: Alert) -> IngestOutcome {
        if self.contains(alert.id()) {
            return IngestOutcome::Duplicate;
        }

        let id = alert.id().clone();
        self.alerts.push(alert);
        self.normalize();

        if self.contains(&id) {
            IngestOutcome::Added
        } else {
            IngestOutcome::Evicted
        }
    }

    /// Sort newest first and evict the oldest entries beyond capacity
    fn normalize(&mut self) -> Vec<Alert> {
        self.alerts.sort_by(|a, b| {
            b.timestamp()
                .cmp(&a.timestamp())
                .then_with(|| a.seq.cmp(&b.seq))
        });

        if self.alerts.len() > self.capacity {
            self.alerts.split_off(self.capacity)
        } else {
            Vec::new()
        }
    }

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DetectionKind;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn record(id: &str, minutes_ago: i64, confidence: f64) -> DetectionRecord {
        DetectionRecord::new(
            DetectionId::from(id),
            DetectionKind::Weapon,
            confidence,
            Some(base() - Duration::minutes(minutes_ago)),
            Some("Main Entrance".to_string()),
        )
    }

    fn ids(feed: &AlertFeed) -> Vec<&str> {
        feed.alerts().iter().map(|a| a.id().as_str()).collect()
    }

    fn assert_invariants(feed: &AlertFeed) {
        let alerts = feed.alerts();
        for pair in alerts.windows(2) {
            assert!(pair[0].timestamp() >= pair[1].timestamp(), "feed out of order");
        }
        let unique: HashSet<_> = alerts.iter().map(|a| a.id()).collect();
        assert_eq!(unique.len(), alerts.len());
        assert!(alerts.len() <= feed.capacity());
        let unread = alerts.iter().filter(|a| a.status.is_unread()).count();
        assert_eq!(feed.unread_count(), unread);
    }

    #[test]
    fn push_is_idempotent() {
        let mut feed = AlertFeed::new(100);
        assert_eq!(feed.ingest_push(record("x", 1, 0.9)), IngestOutcome::Added);
        assert_eq!(feed.ingest_push(record("x", 1, 0.9)), IngestOutcome::Duplicate);
        assert_eq!(feed.filter(None).iter().filter(|a| a.id().as_str() == "x").count(), 1);
        assert_invariants(&feed);
    }

    #[test]
    fn out_of_order_deltas_end_up_sorted() {
        let mut feed = AlertFeed::new(100);
        feed.ingest_push(record("b", 10, 0.6));
        feed.ingest_local(record("a", 1, 0.9));
        feed.ingest_push(record("c", 30, 0.2));
        feed.ingest_local(record("d", 5, 0.7));
        assert_eq!(ids(&feed), vec!["a", "d", "b", "c"]);
        assert_invariants(&feed);
    }

    #[test]
    fn timestamp_ties_keep_insertion_order() {
        let mut feed = AlertFeed::new(100);
        feed.ingest_push(record("first", 5, 0.6));
        feed.ingest_push(record("second", 5, 0.6));
        feed.ingest_local(record("third", 5, 0.6));
        assert_eq!(ids(&feed), vec!["first", "second", "third"]);
    }

    #[test]
    fn undated_alerts_sort_last() {
        let mut feed = AlertFeed::new(100);
        let mut undated = record("undated", 0, 0.9);
        undated.timestamp = None;
        feed.ingest_push(undated);
        feed.ingest_push(record("old", 600, 0.9));
        assert_eq!(ids(&feed), vec!["old", "undated"]);
        assert_eq!(feed.alerts()[1].display_time(base()), "Unknown");
    }

    #[test]
    fn snapshot_keeps_recent_push_and_local_alerts() {
        let mut feed = AlertFeed::new(100);
        feed.ingest_snapshot(vec![record("1", 20, 0.9), record("2", 40, 0.5)]);
        feed.ingest_push(record("p", 2, 0.85));
        feed.ingest_local(record("l", 1, 0.55));

        let summary = feed.ingest_snapshot(vec![record("1", 20, 0.9), record("3", 5, 0.3)]);

        assert_eq!(summary.added, 1);
        assert_eq!(summary.retained, 2);
        assert_eq!(summary.dropped, 1);
        assert_eq!(ids(&feed), vec!["l", "p", "3", "1"]);
        assert_invariants(&feed);
    }

    #[test]
    fn snapshot_preserves_user_status() {
        let mut feed = AlertFeed::new(100);
        feed.ingest_snapshot(vec![record("1", 20, 0.9), record("2", 30, 0.9)]);
        assert!(feed.acknowledge(&DetectionId::from("1")));
        assert!(feed.investigate(&DetectionId::from("2")));

        feed.ingest_snapshot(vec![record("1", 20, 0.9), record("2", 30, 0.9)]);

        assert_eq!(feed.get(&DetectionId::from("1")).unwrap().status, AlertStatus::Acknowledged);
        assert_eq!(feed.get(&DetectionId::from("2")).unwrap().status, AlertStatus::Investigating);
        assert_eq!(feed.unread_count(), 1);
    }

    #[test]
    fn snapshot_adopts_pushed_alert_as_backend() {
        let mut feed = AlertFeed::new(100);
        feed.ingest_push(record("7", 1, 0.9));
        feed.resolve(&DetectionId::from("7"));
        feed.ingest_snapshot(vec![record("7", 1, 0.9)]);

        let alert = feed.get(&DetectionId::from("7")).unwrap();
        assert_eq!(alert.origin, RecordOrigin::Backend);
        assert_eq!(alert.status, AlertStatus::Resolved);

        feed.ingest_snapshot(vec![]);
        assert!(feed.is_empty());
    }

    #[test]
    fn snapshot_counts_local_alerts_leaving_the_local_set() {
        let mut feed = AlertFeed::new(2);
        feed.ingest_local(record("l1", 1, 0.9));
        feed.ingest_local(record("l2", 50, 0.9));

        let summary = feed.ingest_snapshot(vec![record("l1", 1, 0.9), record("9", 5, 0.7)]);
        assert_eq!(summary.evicted, 1);
        assert_eq!(summary.local_removed, 2);
        assert_eq!(ids(&feed), vec!["l1", "9"]);

        let summary = feed.ingest_snapshot(vec![record("l1", 1, 0.9), record("9", 5, 0.7)]);
        assert_eq!(summary.local_removed, 0);
    }

    #[test]
    fn duplicate_ids_inside_one_snapshot_collapse() {
        let mut feed = AlertFeed::new(100);
        let summary = feed.ingest_snapshot(vec![record("1", 1, 0.9), record("1", 1, 0.9)]);
        assert_eq!(summary.added, 1);
        assert_eq!(feed.len(), 1);
    }

    #[test]
    fn state_machine() {
        let mut feed = AlertFeed::new(100);
        feed.ingest_push(record("a", 1, 0.9));
        let id = DetectionId::from("a");

        assert!(feed.investigate(&id));
        assert!(!feed.investigate(&id));
        assert!(feed.acknowledge(&id));
        assert!(!feed.acknowledge(&id));
        assert!(!feed.investigate(&id));
        assert!(feed.resolve(&id));
        assert!(!feed.resolve(&id));
        assert!(!feed.acknowledge(&id));
        assert_eq!(feed.get(&id).unwrap().status, AlertStatus::Resolved);
    }

    #[test]
    fn unknown_ids_are_ignored() {
        let mut feed = AlertFeed::new(100);
        let ghost = DetectionId::from("ghost");
        assert!(!feed.acknowledge(&ghost));
        assert!(!feed.investigate(&ghost));
        assert!(!feed.resolve(&ghost));
    }

    #[test]
    fn acknowledge_all_clears_unread() {
        let mut feed = AlertFeed::new(100);
        feed.ingest_push(record("a", 1, 0.9));
        feed.ingest_push(record("b", 2, 0.6));
        feed.ingest_push(record("c", 3, 0.2));
        feed.investigate(&DetectionId::from("b"));
        feed.resolve(&DetectionId::from("c"));
        assert_eq!(feed.unread_count(), 2);

        assert_eq!(feed.acknowledge_all(), 2);
        assert_eq!(feed.unread_count(), 0);
        assert_eq!(feed.get(&DetectionId::from("c")).unwrap().status, AlertStatus::Resolved);
    }

    #[test]
    fn capacity_evicts_oldest() {
        let mut feed = AlertFeed::new(3);
        feed.ingest_push(record("a", 10, 0.9));
        feed.ingest_push(record("b", 20, 0.9));
        feed.ingest_push(record("c", 30, 0.9));
        assert_eq!(feed.ingest_local(record("d", 1, 0.9)), IngestOutcome::Added);
        assert_eq!(ids(&feed), vec!["d", "a", "b"]);

        assert_eq!(feed.ingest_push(record("ancient", 999, 0.9)), IngestOutcome::Evicted);
        assert_eq!(feed.len(), 3);
        assert_invariants(&feed);
    }

    #[test]
    fn severity_is_derived_once() {
        let mut feed = AlertFeed::new(10);
        feed.ingest_push(record("a", 1, 0.85));
        feed.ingest_push(record("b", 2, 0.6));
        feed.ingest_push(record("c", 3, 0.1));
        assert_eq!(
            feed.counts_by_severity(),
            vec![(Severity::Critical, 1), (Severity::Warning, 1), (Severity::Info, 1)]
        );
        assert_eq!(feed.filter(Some(Severity::Warning)).len(), 1);
    }

    #[test]
    fn restore_keeps_status() {
        let mut feed = AlertFeed::new(10);
        let mut alert = Alert::new(record("l", 1, 0.9), Severity::Critical, RecordOrigin::Local);
        alert.status = AlertStatus::Acknowledged;
        assert_eq!(feed.restore(vec![alert.clone(), alert]), 1);
        assert_eq!(feed.unread_count(), 0);
    }
}
