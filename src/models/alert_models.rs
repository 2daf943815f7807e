use super::detection_models::{time_ago, DetectionId, DetectionRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Severity tier derived from detection confidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 3] = [Severity::Critical, Severity::Warning, Severity::Info];

    /// Map a coarse upstream tier ("high", "medium", "low" and friends)
    pub fn from_tier(tier: &str) -> Option<Self> {
        match tier.trim().to_lowercase().as_str() {
            "critical" | "high" => Some(Self::Critical),
            "warning" | "medium" => Some(Self::Warning),
            "info" | "low" => Some(Self::Info),
            _ => None,
        }
    }
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Critical => write!(f, "Critical"),
            Self::Warning => write!(f, "Warning"),
            Self::Info => write!(f, "Info"),
        }
    }
}

/// Alert lifecycle. `Resolved` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertStatus {
    Active,
    Investigating,
    Acknowledged,
    Resolved,
}

impl AlertStatus {
    /// Counted towards the unread badge
    pub fn is_unread(self) -> bool {
        matches!(self, Self::Active | Self::Investigating)
    }
}

impl Display for AlertStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "Active"),
            Self::Investigating => write!(f, "Investigating"),
            Self::Acknowledged => write!(f, "Acknowledged"),
            Self::Resolved => write!(f, "Resolved"),
        }
    }
}

/// Channel an alert first reached the feed through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordOrigin {
    /// Periodic full snapshot from the detection service
    Backend,
    /// Push-delivered delta
    Push,
    /// Synthesized by the local capture loop
    Local,
}

/// A detection promoted into the user-facing feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub record: DetectionRecord,
    pub severity: Severity,
    pub status: AlertStatus,
    pub origin: RecordOrigin,
    /// Insertion sequence, breaks timestamp ties
    #[serde(skip)]
    pub(crate) seq: u64,
}

impl Alert {
    pub fn new(record: DetectionRecord, severity: Severity, origin: RecordOrigin) -> Self {
        Self {
            record,
            severity,
            status: AlertStatus::Active,
            origin,
            seq: 0,
        }
    }

    pub fn id(&self) -> &DetectionId {
        &self.record.id
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.record.timestamp
    }

    /// "time ago" label, recomputed on every call
    pub fn display_time(&self, now: DateTime<Utc>) -> String {
        time_ago(self.record.timestamp, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_tiers() {
        assert_eq!(Severity::from_tier("high"), Some(Severity::Critical));
        assert_eq!(Severity::from_tier("Medium"), Some(Severity::Warning));
        assert_eq!(Severity::from_tier("low"), Some(Severity::Info));
        assert_eq!(Severity::from_tier("urgent"), None);
    }

    #[test]
    fn unread_statuses() {
        assert!(AlertStatus::Active.is_unread());
        assert!(AlertStatus::Investigating.is_unread());
        assert!(!AlertStatus::Acknowledged.is_unread());
        assert!(!AlertStatus::Resolved.is_unread());
    }
}
