pub mod audio;
pub mod capture;
pub mod config;
pub mod detector;
pub mod error;
pub mod messaging;
pub mod models;
pub mod services;
pub mod storage;

// Re-export main components for easier use
pub use error::Error;
pub use services::{AlertService, AnalyticsService};
