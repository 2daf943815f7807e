use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Opaque detection identifier, used as the dedup key across every feed channel.
///
/// The backend assigns integer ids, locally synthesized detections use UUIDs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "RawId", into = "String")]
pub struct DetectionId(String);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Int(i64),
    Text(String),
}

impl From<RawId> for DetectionId {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Int(n) => Self(n.to_string()),
            RawId::Text(s) => Self(s),
        }
    }
}

impl DetectionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh id for a detection synthesized on this side of the wire
    pub fn local() -> Self {
        Self(format!("local-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<DetectionId> for String {
    fn from(id: DetectionId) -> Self {
        id.0
    }
}

impl From<i64> for DetectionId {
    fn from(n: i64) -> Self {
        Self(n.to_string())
    }
}

impl From<&str> for DetectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Display for DetectionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

const WEAPON_LABELS: &[&str] = &[
    "weapon", "gun", "knife", "pistol", "rifle", "handgun", "sword", "bomb", "grenade", "firearm",
];
const FIRE_LABELS: &[&str] = &["fire", "flame", "blaze"];
const VEHICLE_LABELS: &[&str] = &["vehicle", "car", "truck", "bus", "motorcycle"];

/// What a detection observed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DetectionKind {
    Weapon,
    Fire,
    Smoke,
    Fight,
    Person,
    Vehicle,
    Other(String),
}

impl DetectionKind {
    /// Map a model class label onto a kind. Matching is case-insensitive.
    pub fn from_label(label: &str) -> Self {
        let label = label.trim().to_lowercase();
        if WEAPON_LABELS.contains(&label.as_str()) {
            Self::Weapon
        } else if FIRE_LABELS.contains(&label.as_str()) {
            Self::Fire
        } else if VEHICLE_LABELS.contains(&label.as_str()) {
            Self::Vehicle
        } else {
            match label.as_str() {
                "smoke" => Self::Smoke,
                "fight" => Self::Fight,
                "person" => Self::Person,
                "" => Self::Other("unknown".to_string()),
                _ => Self::Other(label),
            }
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Weapon => "weapon",
            Self::Fire => "fire",
            Self::Smoke => "smoke",
            Self::Fight => "fight",
            Self::Person => "person",
            Self::Vehicle => "vehicle",
            Self::Other(label) => label,
        }
    }
}

impl From<String> for DetectionKind {
    fn from(label: String) -> Self {
        Self::from_label(&label)
    }
}

impl From<DetectionKind> for String {
    fn from(kind: DetectionKind) -> Self {
        kind.label().to_string()
    }
}

impl Display for DetectionKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One observation from the detection service or a local capture tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub id: DetectionId,
    pub kind: DetectionKind,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// `None` when the upstream timestamp could not be parsed
    pub timestamp: Option<DateTime<Utc>>,
    pub source_location: Option<String>,
}

impl DetectionRecord {
    pub fn new(
        id: DetectionId,
        kind: DetectionKind,
        confidence: f64,
        timestamp: Option<DateTime<Utc>>,
        source_location: Option<String>,
    ) -> Self {
        Self {
            id,
            kind,
            confidence: clamp_confidence(confidence),
            timestamp,
            source_location,
        }
    }
}

/// Clamp to [0, 1]; NaN becomes 0
pub fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

/// Parse an offset-qualified RFC 3339 timestamp.
///
/// Strings without an explicit offset are rejected rather than guessed at.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Relative age label: "Just now", "5m ago", "3h ago", "2d ago" or "Unknown"
pub fn time_ago(timestamp: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(timestamp) = timestamp else {
        return "Unknown".to_string();
    };

    let mins = (now - timestamp).num_minutes();
    if mins < 1 {
        return "Just now".to_string();
    }
    if mins < 60 {
        return format!("{}m ago", mins);
    }
    let hours = mins / 60;
    if hours < 24 {
        return format!("{}h ago", hours);
    }
    format!("{}d ago", hours / 24)
}

/// Which detector a capture session talks to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSelection {
    /// One named model, e.g. "weapon" or "fire_smoke"
    Single(String),
    /// Weapon and fire/smoke models on the same frame
    Dual,
    /// Pose-based fight classifier
    Fight,
}

impl Default for ModelSelection {
    fn default() -> Self {
        Self::Single("weapon".to_string())
    }
}

impl Display for ModelSelection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single(name) => write!(f, "single:{}", name),
            Self::Dual => write!(f, "dual"),
            Self::Fight => write!(f, "fight"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn labels_map_onto_kinds() {
        assert_eq!(DetectionKind::from_label("Pistol"), DetectionKind::Weapon);
        assert_eq!(DetectionKind::from_label("flame"), DetectionKind::Fire);
        assert_eq!(DetectionKind::from_label("smoke"), DetectionKind::Smoke);
        assert_eq!(DetectionKind::from_label("truck"), DetectionKind::Vehicle);
        assert_eq!(
            DetectionKind::from_label("backpack"),
            DetectionKind::Other("backpack".to_string())
        );
        assert_eq!(DetectionKind::from_label(""), DetectionKind::Other("unknown".to_string()));
    }

    #[test]
    fn ids_accept_numbers_and_strings() {
        let ids: Vec<DetectionId> = serde_json::from_str(r#"[42, "abc"]"#).unwrap();
        assert_eq!(ids, vec![DetectionId::from(42), DetectionId::from("abc")]);
        assert_eq!(serde_json::to_string(&ids[0]).unwrap(), r#""42""#);
    }

    #[test]
    fn timestamps_require_an_offset() {
        assert!(parse_timestamp("2026-03-01T10:00:00Z").is_some());
        assert_eq!(
            parse_timestamp("2026-03-01T12:00:00+02:00"),
            Some(Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap())
        );
        assert!(parse_timestamp("2026-03-01T10:00:00").is_none());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn time_ago_labels() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(time_ago(Some(now - Duration::seconds(30)), now), "Just now");
        assert_eq!(time_ago(Some(now + Duration::minutes(5)), now), "Just now");
        assert_eq!(time_ago(Some(now - Duration::minutes(5)), now), "5m ago");
        assert_eq!(time_ago(Some(now - Duration::hours(3)), now), "3h ago");
        assert_eq!(time_ago(Some(now - Duration::hours(50)), now), "2d ago");
        assert_eq!(time_ago(None, now), "Unknown");
    }

    #[test]
    fn confidence_is_clamped() {
        assert_eq!(clamp_confidence(1.7), 1.0);
        assert_eq!(clamp_confidence(-0.2), 0.0);
        assert_eq!(clamp_confidence(f64::NAN), 0.0);
    }
}
