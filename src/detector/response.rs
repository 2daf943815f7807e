use crate::error::Error;
use crate::models::{parse_timestamp, DetectionId, DetectionKind, DetectionRecord};
use anyhow::Result;
use chrono::{DateTime, Utc};
use log::warn;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Confidence recorded for a positive fight verdict without a probability
const DEFAULT_FIGHT_CONFIDENCE: f64 = 0.8;

/// Bounding box in frame pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

/// One object found by a single model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    #[serde(rename = "class")]
    pub class_name: String,
    pub confidence: f64,
    #[serde(rename = "box", default)]
    pub bounding_box: Option<BoundingBox>,
}

/// `POST /detect` body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleModelResponse {
    #[serde(default)]
    pub detections: Vec<RawDetection>,
    /// Annotated frame, base64 JPEG
    pub image: Option<String>,
    pub model_used: Option<String>,
}

/// `POST /detect/both` body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DualModelResponse {
    #[serde(default)]
    pub weapon_detections: Vec<RawDetection>,
    #[serde(default)]
    pub fire_smoke_detections: Vec<RawDetection>,
    pub weapon_image: Option<String>,
    pub fire_smoke_image: Option<String>,
}

/// `POST /detect/fight` body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FightResponse {
    #[serde(default)]
    pub is_fight: bool,
    pub fight_probability: Option<f64>,
    pub no_fight_probability: Option<f64>,
    pub message: Option<String>,
    pub image: Option<String>,
}

/// Result of one detection request, tagged by the endpoint that produced it
#[derive(Debug, Clone, PartialEq)]
pub enum DetectionResponse {
    Single(SingleModelResponse),
    Dual(DualModelResponse),
    Fight(FightResponse),
}

impl DetectionResponse {
    /// Normalize into detection records stamped with `observed_at`.
    ///
    /// Dual results list weapon detections before fire/smoke ones. A fight
    /// verdict yields at most one record.
    pub fn into_records(self, location: &str, observed_at: DateTime<Utc>) -> Vec<DetectionRecord> {
        let from_raw = |raw: RawDetection| {
            DetectionRecord::new(
                DetectionId::local(),
                DetectionKind::from_label(&raw.class_name),
                raw.confidence,
                Some(observed_at),
                Some(location.to_string()),
            )
        };

        match self {
            Self::Single(response) => response.detections.into_iter().map(from_raw).collect(),
            Self::Dual(response) => response
                .weapon_detections
                .into_iter()
                .chain(response.fire_smoke_detections)
                .map(from_raw)
                .collect(),
            Self::Fight(response) if response.is_fight => vec![DetectionRecord::new(
                DetectionId::local(),
                DetectionKind::Fight,
                response.fight_probability.unwrap_or(DEFAULT_FIGHT_CONFIDENCE),
                Some(observed_at),
                Some(location.to_string()),
            )],
            Self::Fight(_) => Vec::new(),
        }
    }

    /// Annotated frame(s) returned with the result
    pub fn images(&self) -> Vec<&str> {
        match self {
            Self::Single(response) => response.image.as_deref().into_iter().collect(),
            Self::Dual(response) => response
                .weapon_image
                .as_deref()
                .into_iter()
                .chain(response.fire_smoke_image.as_deref())
                .collect(),
            Self::Fight(response) => response.image.as_deref().into_iter().collect(),
        }
    }
}

/// One row of `GET /detections`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRow {
    pub detection_id: DetectionId,
    #[serde(rename = "type")]
    pub detection_type: String,
    pub confidence: f64,
    pub timestamp: Option<String>,
    pub camera_location: Option<String>,
    pub image_url: Option<String>,
}

impl HistoryRow {
    pub fn into_record(self) -> DetectionRecord {
        let timestamp = self.timestamp.as_deref().and_then(|raw| {
            let parsed = parse_timestamp(raw);
            if parsed.is_none() {
                warn!("Detection {} has unparseable timestamp {:?}", self.detection_id, raw);
            }
            parsed
        });

        DetectionRecord::new(
            self.detection_id,
            DetectionKind::from_label(&self.detection_type),
            self.confidence,
            timestamp,
            self.camera_location,
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct HistoryResponse {
    #[serde(default)]
    pub detections: Vec<HistoryRow>,
}

/// `GET /models` body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCatalog {
    #[serde(default)]
    pub models: Vec<String>,
    pub current_model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SwitchResponse {
    pub current_model: String,
}

/// The service reports failures as `{"error", "details"}` with a success status
#[derive(Debug, Clone, Deserialize)]
struct ErrorBody {
    error: String,
    details: Option<String>,
}

/// Decode a response body, turning an in-band error object into `Error::Detection`
pub(crate) fn decode_body<T: DeserializeOwned>(body: serde_json::Value) -> Result<T> {
    if body.get("error").is_some() {
        let error: ErrorBody = serde_json::from_value(body)
            .map_err(|e| Error::Serialization(format!("Malformed error body: {}", e)))?;
        let message = match error.details {
            Some(details) => format!("{}: {}", error.error, details),
            None => error.error,
        };
        return Err(Error::Detection(message).into());
    }

    serde_json::from_value(body)
        .map_err(|e| Error::Serialization(format!("Unexpected response body: {}", e)).into())
}
