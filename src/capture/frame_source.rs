use crate::config::FrameSourceConfig;
use crate::error::Error;
use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::time::Duration;

const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(5);

/// One encoded still frame ready to upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub file_name: String,
}

impl EncodedFrame {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
            file_name: file_name.into(),
        }
    }

    pub fn jpeg(bytes: Vec<u8>) -> Self {
        Self::new(bytes, "image/jpeg", "frame.jpg")
    }
}

/// A live video source sampled one frame at a time
#[async_trait]
pub trait FrameSource: Send {
    /// Human-readable name, used in logs
    fn name(&self) -> &str;

    /// Acquire the media. Failure means the capture session must not start.
    async fn open(&mut self) -> Result<()>;

    /// Grab and encode the current frame
    async fn capture(&mut self) -> Result<EncodedFrame>;

    /// Give the media back. Called once when the session stops.
    async fn release(&mut self);
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        _ => "image/jpeg",
    }
}

/// Still image on disk, refreshed in place by an external grabber
pub struct FileFrameSource {
    name: String,
    path: PathBuf,
    opened: bool,
}

impl FileFrameSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            name: format!("file:{}", path.display()),
            path,
            opened: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.opened
    }
}

#[async_trait]
impl FrameSource for FileFrameSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&mut self) -> Result<()> {
        let metadata = tokio::fs::metadata(&self.path)
            .await
            .map_err(|e| Error::Media(format!("Cannot open frame file {:?}: {}", self.path, e)))?;

        if !metadata.is_file() {
            return Err(Error::Media(format!("Frame path {:?} is not a file", self.path)).into());
        }

        self.opened = true;
        info!("Opened frame source {}", self.name);
        Ok(())
    }

    async fn capture(&mut self) -> Result<EncodedFrame> {
        if !self.opened {
            return Err(Error::Media(format!("Frame source {} is not open", self.name)).into());
        }

        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| Error::Media(format!("Failed to read frame {:?}: {}", self.path, e)))?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "frame.jpg".to_string());

        Ok(EncodedFrame::new(bytes, mime_for(&self.path), file_name))
    }

    async fn release(&mut self) {
        self.opened = false;
        debug!("Released frame source {}", self.name);
    }
}

/// Camera JPEG snapshot endpoint
pub struct HttpSnapshotSource {
    name: String,
    url: String,
    http_client: Option<reqwest::Client>,
}

impl HttpSnapshotSource {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            name: format!("snapshot:{}", url),
            url,
            http_client: None,
        }
    }

    async fn fetch(client: &reqwest::Client, url: &str) -> Result<EncodedFrame> {
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Media(format!("Snapshot request to {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(Error::Media(format!("Snapshot {} returned {}", url, response.status())).into());
        }

        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/jpeg")
            .to_string();

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Media(format!("Failed to read snapshot body: {}", e)))?;

        Ok(EncodedFrame::new(bytes.to_vec(), mime_type, "snapshot.jpg"))
    }
}

#[async_trait]
impl FrameSource for HttpSnapshotSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&mut self) -> Result<()> {
        let client = reqwest::Client::builder()
            .timeout(SNAPSHOT_TIMEOUT)
            .build()
            .map_err(|e| Error::Media(format!("Failed to build snapshot client: {}", e)))?;

        // Probe once so an unreachable camera fails the start
        Self::fetch(&client, &self.url).await?;

        self.http_client = Some(client);
        info!("Opened frame source {}", self.name);
        Ok(())
    }

    async fn capture(&mut self) -> Result<EncodedFrame> {
        match &self.http_client {
            Some(client) => Self::fetch(client, &self.url).await,
            None => Err(Error::Media(format!("Frame source {} is not open", self.name)).into()),
        }
    }

    async fn release(&mut self) {
        self.http_client = None;
        debug!("Released frame source {}", self.name);
    }
}

/// Build the frame source named in the capture configuration
pub fn frame_source_from_config(config: &FrameSourceConfig) -> Box<dyn FrameSource> {
    match config {
        FrameSourceConfig::File { path } => Box::new(FileFrameSource::new(path.clone())),
        FrameSourceConfig::Snapshot { url } => Box::new(HttpSnapshotSource::new(url.clone())),
    }
}
