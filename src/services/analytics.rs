use crate::detector::DetectionBackend;
use crate::messaging::broker::{EventBroker, MessageBrokerTrait};
use crate::messaging::EventType;
use crate::models::{
    time_ago, ActivityBucket, AnalyticsReport, DateRange, DetectionRecord, RecentDetection,
    Severity, SeverityShare, TypeShare,
};
use crate::services::severity::{classify, CRITICAL_THRESHOLD};
use anyhow::Result;
use chrono::{DateTime, Local, TimeZone, Timelike, Utc};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};

pub const BUCKET_COUNT: usize = 8;
const BUCKET_HOURS: u32 = 3;
/// Shortest refresh period; a zero period is raised to this
const MIN_REFRESH_PERIOD: Duration = Duration::from_secs(1);

/// `count / total * 100` rounded to one decimal, 0 when `total` is 0
pub fn percentage(count: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round1(count as f64 / total as f64 * 100.0)
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Records at or after a cutoff. Rebuilt from the full history every time.
#[derive(Debug, Clone)]
pub struct AggregationWindow<'a> {
    pub cutoff: DateTime<Utc>,
    pub records: Vec<&'a DetectionRecord>,
}

impl<'a> AggregationWindow<'a> {
    /// Undated records never fall inside a window
    pub fn build(history: &'a [DetectionRecord], cutoff: DateTime<Utc>) -> Self {
        let records = history
            .iter()
            .filter(|r| r.timestamp.map_or(false, |ts| ts >= cutoff))
            .collect();
        Self { cutoff, records }
    }
}

/// Aggregate `history` from `cutoff` onwards.
///
/// Hour-of-day bucketing uses `now`'s timezone.
pub fn aggregate<Tz: TimeZone>(
    history: &[DetectionRecord],
    cutoff: DateTime<Utc>,
    now: &DateTime<Tz>,
    recent_limit: usize,
) -> AnalyticsReport {
    let window = AggregationWindow::build(history, cutoff);
    let total = window.records.len();

    let average_confidence = if total == 0 {
        0.0
    } else {
        let sum: f64 = window.records.iter().map(|r| r.confidence).sum();
        round1(sum / total as f64 * 100.0)
    };

    let high_count = window
        .records
        .iter()
        .filter(|r| r.confidence >= CRITICAL_THRESHOLD)
        .count();

    let activity = activity_histogram(&window, &now.timezone());
    let peak_bucket = peak_bucket(&activity);

    let severity_distribution = Severity::ALL
        .iter()
        .map(|severity| {
            let count = window
                .records
                .iter()
                .filter(|r| classify(r.confidence) == *severity)
                .count();
            SeverityShare {
                severity: *severity,
                count,
                percentage: percentage(count, total),
            }
        })
        .collect();

    let mut type_counts: HashMap<&str, usize> = HashMap::new();
    for record in &window.records {
        *type_counts.entry(record.kind.label()).or_insert(0) += 1;
    }
    let mut type_breakdown: Vec<TypeShare> = type_counts
        .into_iter()
        .map(|(kind, count)| TypeShare {
            kind: kind.to_string(),
            count,
            percentage: percentage(count, total),
        })
        .collect();
    type_breakdown.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.kind.cmp(&b.kind)));

    let now_utc = now.with_timezone(&Utc);
    let mut dated: Vec<(DateTime<Utc>, &DetectionRecord)> = window
        .records
        .iter()
        .filter_map(|r| r.timestamp.map(|ts| (ts, *r)))
        .collect();
    dated.sort_by(|a, b| b.0.cmp(&a.0));
    let recent = dated
        .into_iter()
        .take(recent_limit)
        .map(|(ts, r)| RecentDetection {
            id: r.id.clone(),
            kind: r.kind.label().to_string(),
            confidence: r.confidence,
            timestamp: ts,
            time_ago: time_ago(Some(ts), now_utc),
        })
        .collect();

    AnalyticsReport {
        cutoff,
        total,
        average_confidence,
        high_severity_rate: percentage(high_count, total),
        activity,
        peak_bucket,
        severity_distribution,
        type_breakdown,
        recent,
    }
}

fn activity_histogram<Tz: TimeZone>(window: &AggregationWindow<'_>, tz: &Tz) -> Vec<ActivityBucket> {
    let mut counts = [0usize; BUCKET_COUNT];
    for ts in window.records.iter().filter_map(|r| r.timestamp) {
        let hour = ts.with_timezone(tz).hour();
        let idx = ((hour / BUCKET_HOURS) as usize).min(BUCKET_COUNT - 1);
        counts[idx] += 1;
    }

    counts
        .iter()
        .enumerate()
        .map(|(idx, count)| {
            let start_hour = idx as u32 * BUCKET_HOURS;
            ActivityBucket {
                label: format!("{:02}:00", start_hour),
                start_hour,
                count: *count,
            }
        })
        .collect()
}

/// Earliest bucket holding the maximum count, `None` when all are empty
fn peak_bucket(activity: &[ActivityBucket]) -> Option<usize> {
    let mut peak: Option<usize> = None;
    for (idx, bucket) in activity.iter().enumerate() {
        if bucket.count == 0 {
            continue;
        }
        match peak {
            Some(best) if activity[best].count >= bucket.count => {}
            _ => peak = Some(idx),
        }
    }
    peak
}

/// Detection history plus the selected date range
#[derive(Debug, Clone)]
pub struct AnalyticsAggregator {
    history: Vec<DetectionRecord>,
    range: DateRange,
    recent_limit: usize,
    history_limit: usize,
}

impl AnalyticsAggregator {
    pub fn new(range: DateRange, recent_limit: usize) -> Self {
        Self {
            history: Vec::new(),
            range,
            recent_limit,
            history_limit: usize::MAX,
        }
    }

    /// Cap the cached history, newest entries kept
    pub fn with_history_limit(mut self, history_limit: usize) -> Self {
        self.history_limit = history_limit.max(1);
        self
    }

    pub fn range(&self) -> DateRange {
        self.range
    }

    pub fn set_range(&mut self, range: DateRange) {
        self.range = range;
    }

    pub fn history(&self) -> &[DetectionRecord] {
        &self.history
    }

    pub fn replace_history(&mut self, mut history: Vec<DetectionRecord>) {
        history.truncate(self.history_limit);
        self.history = history;
    }

    /// Prepend a real-time detection unless its id is already known
    pub fn record(&mut self, record: DetectionRecord) -> bool {
        if self.history.iter().any(|r| r.id == record.id) {
            return false;
        }
        self.history.insert(0, record);
        self.history.truncate(self.history_limit);
        true
    }

    pub fn report<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> AnalyticsReport {
        aggregate(&self.history, self.range.cutoff(now), now, self.recent_limit)
    }
}

/// Keeps an `AnalyticsAggregator` fed from the backend and the event broker
pub struct AnalyticsService {
    aggregator: RwLock<AnalyticsAggregator>,
    latest: RwLock<Option<AnalyticsReport>>,
    last_error: RwLock<Option<String>>,
    broker: Arc<EventBroker>,
}

impl AnalyticsService {
    pub fn new(aggregator: AnalyticsAggregator, broker: Arc<EventBroker>) -> Self {
        Self {
            aggregator: RwLock::new(aggregator),
            latest: RwLock::new(None),
            last_error: RwLock::new(None),
            broker,
        }
    }

    /// Periodic refresh from the backend history endpoint
    pub fn start(
        self: Arc<Self>,
        backend: Arc<dyn DetectionBackend>,
        refresh_interval: Duration,
        history_limit: usize,
    ) -> JoinHandle<()> {
        info!(
            "Starting analytics refresh every {} seconds",
            refresh_interval.as_secs()
        );

        let refresh_interval = if refresh_interval.is_zero() {
            warn!("Analytics refresh interval is zero, using {:?}", MIN_REFRESH_PERIOD);
            MIN_REFRESH_PERIOD
        } else {
            refresh_interval
        };

        tokio::spawn(async move {
            let mut interval = interval(refresh_interval);

            loop {
                interval.tick().await;

                if let Err(e) = self.refresh(backend.as_ref(), history_limit).await {
                    error!("Error refreshing analytics: {}", e);
                }
            }
        })
    }

    /// Subscribe to raised alerts so the report moves between refreshes
    pub async fn follow_alerts(self: Arc<Self>) -> Result<String> {
        let service = self.clone();
        self.broker
            .subscribe(
                EventType::AlertRaised,
                Arc::new(move |event| {
                    let record: DetectionRecord =
                        serde_json::from_value(event.payload["record"].clone())?;
                    let service = service.clone();
                    tokio::spawn(async move {
                        service.push_record(record).await;
                    });
                    Ok(())
                }),
            )
            .await
    }

    /// Fetch a fresh history and recompute. On failure the previous history
    /// and report are kept and the error is exposed as a banner.
    pub async fn refresh(&self, backend: &dyn DetectionBackend, limit: usize) -> Result<()> {
        match backend.history(limit).await {
            Ok(history) => {
                debug!("Analytics history refreshed: {} records", history.len());
                self.aggregator.write().await.replace_history(history);
                *self.last_error.write().await = None;
                self.recompute().await;
                Ok(())
            }
            Err(e) => {
                warn!("Failed to load analytics data: {}", e);
                *self.last_error.write().await = Some(format!("Failed to load analytics data: {}", e));
                Err(e)
            }
        }
    }

    pub async fn set_range(&self, range: DateRange) -> AnalyticsReport {
        self.aggregator.write().await.set_range(range);
        self.recompute().await
    }

    pub async fn push_record(&self, record: DetectionRecord) {
        let added = self.aggregator.write().await.record(record);
        if added {
            self.recompute().await;
        }
    }

    pub async fn latest_report(&self) -> Option<AnalyticsReport> {
        self.latest.read().await.clone()
    }

    pub async fn last_error(&self) -> Option<String> {
        self.last_error.read().await.clone()
    }

    async fn recompute(&self) -> AnalyticsReport {
        let report = self.aggregator.read().await.report(&Local::now());
        *self.latest.write().await = Some(report.clone());

        if let Err(e) = self
            .broker
            .publish(EventType::AnalyticsUpdated, None, &report)
            .await
        {
            warn!("Failed to publish analytics update: {}", e);
        }

        report
    }
}
