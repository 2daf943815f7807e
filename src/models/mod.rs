pub mod alert_models;
pub mod analytics_models;
pub mod detection_models;

pub use alert_models::{Alert, AlertStatus, RecordOrigin, Severity};
pub use analytics_models::{
    ActivityBucket, AnalyticsReport, DateRange, RecentDetection, SeverityShare, TypeShare,
};
pub use detection_models::{
    clamp_confidence, parse_timestamp, time_ago, DetectionId, DetectionKind, DetectionRecord,
    ModelSelection,
};
