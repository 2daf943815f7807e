use crate::capture::EncodedFrame;
use crate::config::DetectorConfig;
use crate::detector::response::{
    decode_body, DetectionResponse, HistoryResponse, HistoryRow, ModelCatalog, SwitchResponse,
};
use crate::detector::DetectionBackend;
use crate::error::Error;
use crate::models::{DetectionRecord, ModelSelection};
use anyhow::Result;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use std::time::Duration;
use url::Url;

const USER_AGENT: &str = concat!("detection-monitor/", env!("CARGO_PKG_VERSION"));

/// HTTP client for the detection service
pub struct HttpDetectionClient {
    http_client: reqwest::Client,
    base_url: Url,
}

impl HttpDetectionClient {
    pub fn new(config: &DetectorConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| Error::Config(format!("Invalid detector URL {}: {}", config.base_url, e)))?;

        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::Config(format!("Invalid endpoint {}: {}", path, e)).into())
    }

    fn frame_part(frame: &EncodedFrame) -> Result<Part> {
        Part::bytes(frame.bytes.clone())
            .file_name(frame.file_name.clone())
            .mime_str(&frame.mime_type)
            .map_err(|e| Error::Media(format!("Invalid frame mime type {}: {}", frame.mime_type, e)).into())
    }

    async fn send(&self, request: reqwest::RequestBuilder, what: &str) -> Result<serde_json::Value> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::Transport(format!("{} request failed: {}", what, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Transport(format!("{} returned {}: {}", what, status, body)).into());
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| Error::Serialization(format!("{} returned invalid JSON: {}", what, e)).into())
    }

    /// Clear the fight classifier's frame buffer
    pub async fn reset_fight_buffer(&self) -> Result<()> {
        let url = self.endpoint("/fight/reset")?;
        self.send(self.http_client.post(url), "Fight reset").await?;
        Ok(())
    }
}

#[async_trait]
impl DetectionBackend for HttpDetectionClient {
    async fn detect(
        &self,
        frame: &EncodedFrame,
        selection: &ModelSelection,
        camera_id: &str,
    ) -> Result<DetectionResponse> {
        let (path, form) = match selection {
            ModelSelection::Single(model) => (
                "/detect",
                Form::new()
                    .part("file", Self::frame_part(frame)?)
                    .text("camera_id", camera_id.to_string())
                    .text("model_type", model.clone()),
            ),
            ModelSelection::Dual => (
                "/detect/both",
                Form::new()
                    .part("file", Self::frame_part(frame)?)
                    .text("camera_id", camera_id.to_string()),
            ),
            ModelSelection::Fight => ("/detect/fight", Form::new().part("file", Self::frame_part(frame)?)),
        };

        tracing::debug!(
            endpoint = path,
            bytes = frame.bytes.len(),
            camera_id = camera_id,
            "Dispatching detection request"
        );

        let url = self.endpoint(path)?;
        let body = self
            .send(self.http_client.post(url).multipart(form), "Detection")
            .await?;

        let response = match selection {
            ModelSelection::Single(_) => DetectionResponse::Single(decode_body(body)?),
            ModelSelection::Dual => DetectionResponse::Dual(decode_body(body)?),
            ModelSelection::Fight => DetectionResponse::Fight(decode_body(body)?),
        };
        Ok(response)
    }

    async fn history(&self, limit: usize) -> Result<Vec<DetectionRecord>> {
        let mut url = self.endpoint("/detections")?;
        url.query_pairs_mut().append_pair("limit", &limit.to_string());

        let body = self.send(self.http_client.get(url), "History").await?;
        let history: HistoryResponse = decode_body(body)?;

        tracing::debug!(rows = history.detections.len(), "Fetched detection history");
        Ok(history.detections.into_iter().map(HistoryRow::into_record).collect())
    }

    async fn models(&self) -> Result<ModelCatalog> {
        let url = self.endpoint("/models")?;
        let body = self.send(self.http_client.get(url), "Models").await?;
        decode_body(body)
    }

    async fn switch_model(&self, model_name: &str) -> Result<String> {
        let url = self.endpoint("/models/switch")?;
        let form = Form::new().text("model_name", model_name.to_string());
        let body = self
            .send(self.http_client.post(url).multipart(form), "Model switch")
            .await?;
        let switched: SwitchResponse = decode_body(body)?;

        tracing::info!(model = %switched.current_model, "Detector model switched");
        Ok(switched.current_model)
    }
}
