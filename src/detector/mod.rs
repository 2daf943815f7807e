pub mod client;
pub mod response;

pub use client::HttpDetectionClient;
pub use response::{
    BoundingBox, DetectionResponse, DualModelResponse, FightResponse, HistoryRow, ModelCatalog,
    RawDetection, SingleModelResponse,
};

use crate::capture::EncodedFrame;
use crate::models::{DetectionRecord, ModelSelection};
use anyhow::Result;
use async_trait::async_trait;

/// Detection service seam
#[async_trait]
pub trait DetectionBackend: Send + Sync {
    /// Run the selected model(s) over one encoded frame
    async fn detect(
        &self,
        frame: &EncodedFrame,
        selection: &ModelSelection,
        camera_id: &str,
    ) -> Result<DetectionResponse>;

    /// Most recent `limit` detections, newest first
    async fn history(&self, limit: usize) -> Result<Vec<DetectionRecord>>;

    async fn models(&self) -> Result<ModelCatalog>;

    /// Returns the model now active
    async fn switch_model(&self, model_name: &str) -> Result<String>;
}
