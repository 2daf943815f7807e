use crate::error::Error;
use crate::models::{Alert, RecordOrigin};
use anyhow::Result;
use log::{debug, warn};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// JSON file holding locally synthesized alerts across restarts
#[derive(Debug, Clone)]
pub struct AlertStore {
    path: PathBuf,
    capacity: usize,
}

impl AlertStore {
    pub fn new(path: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            path: path.into(),
            capacity: capacity.max(1),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored alerts, newest first. A missing or unreadable file yields none.
    pub async fn load(&self) -> Vec<Alert> {
        let contents = match tokio::fs::read(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No alert store at {:?}", self.path);
                return Vec::new();
            }
            Err(e) => {
                warn!("Failed to read alert store {:?}: {}", self.path, e);
                return Vec::new();
            }
        };

        match serde_json::from_slice::<Vec<Alert>>(&contents) {
            Ok(mut alerts) => {
                alerts.truncate(self.capacity);
                debug!("Loaded {} alerts from {:?}", alerts.len(), self.path);
                alerts
            }
            Err(e) => {
                warn!("Discarding corrupt alert store {:?}: {}", self.path, e);
                Vec::new()
            }
        }
    }

    /// Persist the local alerts of `feed` (already newest first), capped at capacity
    pub async fn save(&self, feed: &[Alert]) -> Result<usize> {
        let local: Vec<&Alert> = feed
            .iter()
            .filter(|a| a.origin == RecordOrigin::Local)
            .take(self.capacity)
            .collect();

        let bytes = serde_json::to_vec(&local)
            .map_err(|e| Error::Serialization(format!("Failed to encode alerts: {}", e)))?;
        self.write_atomic(&bytes).await?;

        debug!("Saved {} alerts to {:?}", local.len(), self.path);
        Ok(local.len())
    }

    /// Write to a temp file next to the target, then rename over it
    async fn write_atomic(&self, bytes: &[u8]) -> Result<()> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        tokio::fs::create_dir_all(&parent)
            .await
            .map_err(|e| Error::Storage(format!("Failed to create {:?}: {}", parent, e)))?;

        let file_name = self
            .path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("alerts");
        let tmp = parent.join(format!(".{}.tmp.{}", file_name, std::process::id()));

        {
            let mut file = tokio::fs::File::create(&tmp)
                .await
                .map_err(|e| Error::Storage(format!("Failed to create {:?}: {}", tmp, e)))?;
            file.write_all(bytes)
                .await
                .map_err(|e| Error::Storage(format!("Failed to write {:?}: {}", tmp, e)))?;
            file.sync_all()
                .await
                .map_err(|e| Error::Storage(format!("Failed to sync {:?}: {}", tmp, e)))?;
        }

        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| Error::Storage(format!("Failed to replace {:?}: {}", self.path, e)))?;
        Ok(())
    }
}
