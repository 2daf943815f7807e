use super::alert_models::Severity;
use super::detection_models::DetectionId;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Date-range filter for analytics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateRange {
    /// Since local midnight
    Today,
    #[default]
    Week,
    Month,
    Year,
    All,
}

impl DateRange {
    /// Earliest timestamp included by this range, relative to `now`.
    ///
    /// `Today` starts at midnight in `now`'s timezone; the others are fixed
    /// 7, 30 and 365 day windows.
    pub fn cutoff<Tz: TimeZone>(self, now: &DateTime<Tz>) -> DateTime<Utc> {
        match self {
            Self::Today => {
                let midnight = now.date_naive().and_hms_opt(0, 0, 0).unwrap_or_default();
                now.timezone()
                    .from_local_datetime(&midnight)
                    .earliest()
                    .map(|ts| ts.with_timezone(&Utc))
                    .unwrap_or_else(|| now.with_timezone(&Utc) - Duration::days(1))
            }
            Self::Week => now.with_timezone(&Utc) - Duration::days(7),
            Self::Month => now.with_timezone(&Utc) - Duration::days(30),
            Self::Year => now.with_timezone(&Utc) - Duration::days(365),
            Self::All => DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

impl FromStr for DateRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "today" => Ok(Self::Today),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            "year" => Ok(Self::Year),
            "all" => Ok(Self::All),
            other => Err(format!("unknown date range: {}", other)),
        }
    }
}

/// One 3-hour slice of the 24-hour clock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityBucket {
    /// Start label, e.g. "09:00"
    pub label: String,
    pub start_hour: u32,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeverityShare {
    pub severity: Severity,
    pub count: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeShare {
    pub kind: String,
    pub count: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentDetection {
    pub id: DetectionId,
    pub kind: String,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    pub time_ago: String,
}

/// Display-ready statistics for one aggregation window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsReport {
    pub cutoff: DateTime<Utc>,
    pub total: usize,
    /// Mean confidence as a percentage, one decimal
    pub average_confidence: f64,
    /// Percentage of records with confidence >= 0.8
    pub high_severity_rate: f64,
    pub activity: Vec<ActivityBucket>,
    /// Index into `activity`, `None` when every bucket is empty
    pub peak_bucket: Option<usize>,
    pub severity_distribution: Vec<SeverityShare>,
    pub type_breakdown: Vec<TypeShare>,
    pub recent: Vec<RecentDetection>,
}

impl AnalyticsReport {
    /// Peak window label such as "09:00-12:00", or "N/A"
    pub fn peak_label(&self) -> String {
        match self.peak_bucket.and_then(|idx| self.activity.get(idx)) {
            Some(bucket) => format!("{:02}:00-{:02}:00", bucket.start_hour, bucket.start_hour + 3),
            None => "N/A".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    #[test]
    fn today_starts_at_local_midnight() {
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        let now = tz.with_ymd_and_hms(2026, 3, 1, 15, 30, 0).unwrap();
        let cutoff = DateRange::Today.cutoff(&now);
        assert_eq!(cutoff, Utc.with_ymd_and_hms(2026, 2, 28, 22, 0, 0).unwrap());
    }

    #[test]
    fn fixed_windows() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        assert_eq!(DateRange::Week.cutoff(&now), now - Duration::days(7));
        assert_eq!(DateRange::Month.cutoff(&now), now - Duration::days(30));
        assert_eq!(DateRange::Year.cutoff(&now), now - Duration::days(365));
        assert_eq!(DateRange::All.cutoff(&now), DateTime::<Utc>::UNIX_EPOCH);
    }

    #[test]
    fn parses_range_names() {
        assert_eq!("Month".parse::<DateRange>(), Ok(DateRange::Month));
        assert!("fortnight".parse::<DateRange>().is_err());
    }
}
