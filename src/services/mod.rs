pub mod alert_feed;
pub mod alert_service;
pub mod analytics;
pub mod severity;

pub use alert_feed::{AlertFeed, IngestOutcome, SnapshotSummary};
pub use alert_service::AlertService;
pub use analytics::{AnalyticsAggregator, AnalyticsService};
