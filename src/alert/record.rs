use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::detect::BoundingBox;
use crate::pipeline::IntrusionEvent;

pub const HUMAN_INTRUSION: &str = "Human Intrusion";

/// Durable artifact of one accepted alert. Immutable once created; the clip
/// path is attached in persistence when recording completes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub alert_type: String,
    pub zone_name: String,
    pub confidence: f32,
    pub coordinates: BoundingBox,
    pub video_path: Option<PathBuf>,
    #[serde(with = "epoch_ms")]
    pub triggered_at: SystemTime,
}

impl AlertRecord {
    pub fn from_event(event: &IntrusionEvent) -> Self {
        Self {
            alert_type: HUMAN_INTRUSION.to_string(),
            zone_name: event.zone.name().to_string(),
            confidence: event.detection.confidence,
            coordinates: event.detection.bbox,
            video_path: None,
            triggered_at: event.observed_at,
        }
    }

    /// Operator-facing one-liner used in logs and notifications.
    pub fn headline(&self) -> String {
        format!(
            "{} in {} ({:.0}% confidence)",
            self.alert_type,
            self.zone_name,
            self.confidence * 100.0
        )
    }
}

/// Persisted alert as read back from the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredAlert {
    pub id: i64,
    pub status: String,
    #[serde(flatten)]
    pub record: AlertRecord,
}

/// Milliseconds since the Unix epoch, saturating for pre-epoch times.
pub fn to_epoch_ms(t: SystemTime) -> i64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis().min(i64::MAX as u128) as i64)
        .unwrap_or(0)
}

pub fn from_epoch_ms(ms: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(ms.max(0) as u64)
}

pub(crate) mod epoch_ms {
    use std::time::SystemTime;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &SystemTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64(super::to_epoch_ms(*t))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SystemTime, D::Error> {
        Ok(super::from_epoch_ms(i64::deserialize(d)?))
    }
}
