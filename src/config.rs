use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capture::CameraSettings;
use crate::error::ConfigError;
use crate::source::ReconnectPolicy;
use crate::zone::{Point, Zone};

const DEFAULT_CAMERA: &str = "stub://camera0";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_FPS: u32 = 30;
const DEFAULT_CONFIDENCE: f32 = 0.5;
const DEFAULT_DETECT_EVERY: u32 = 3;
const DEFAULT_DETECTOR_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_COOLDOWN_SECS: u64 = 30;
const DEFAULT_RECORDING_SECS: u64 = 10;
const DEFAULT_CLIP_DIR: &str = "static/uploads";
const DEFAULT_CLIP_QUALITY: u8 = 80;
const DEFAULT_DB_PATH: &str = "database/surveillance.db";
const DEFAULT_MQTT_TOPIC: &str = "zonewatch/alerts";

#[derive(Debug, Deserialize, Default)]
struct ZonewatchConfigFile {
    db_path: Option<PathBuf>,
    camera: Option<CameraConfigFile>,
    detection: Option<DetectionConfigFile>,
    alerts: Option<AlertsConfigFile>,
    zones: Option<Vec<ZoneConfigFile>>,
    notify: Option<NotifyConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    source: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
    open_attempts: Option<u32>,
    reconnect_attempts: Option<u32>,
    retry_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    confidence_threshold: Option<f32>,
    detect_every: Option<u32>,
    detector_url: Option<String>,
    detector_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertsConfigFile {
    cooldown_secs: Option<u64>,
    recording_secs: Option<u64>,
    clip_dir: Option<PathBuf>,
    clip_quality: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct ZoneConfigFile {
    name: String,
    #[serde(alias = "coords")]
    polygon: Vec<Point>,
}

#[derive(Debug, Deserialize, Default)]
struct NotifyConfigFile {
    telegram_bot_token: Option<String>,
    telegram_chat_id: Option<String>,
    email_relay_url: Option<String>,
    email_from: Option<String>,
    alert_email: Option<String>,
    mqtt_broker_addr: Option<String>,
    mqtt_topic: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ZonewatchConfig {
    pub db_path: PathBuf,
    pub camera: CameraSettings,
    pub reconnect: ReconnectPolicy,
    pub detection: DetectionSettings,
    pub alerts: AlertSettings,
    pub zones: Vec<Zone>,
    pub notify: NotifySettings,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub confidence_threshold: f32,
    /// Run the detector on every Nth frame.
    pub detect_every: u32,
    pub detector_url: Option<String>,
    pub detector_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AlertSettings {
    pub cooldown: Duration,
    pub recording_duration: Duration,
    pub clip_dir: PathBuf,
    pub clip_quality: u8,
}

#[derive(Debug, Clone, Default)]
pub struct NotifySettings {
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub email_relay_url: Option<String>,
    pub email_from: Option<String>,
    pub alert_email: Option<String>,
    pub mqtt_broker_addr: Option<String>,
    pub mqtt_topic: String,
}

impl Default for ZonewatchConfig {
    fn default() -> Self {
        Self::from_file(ZonewatchConfigFile::default())
    }
}

impl ZonewatchConfig {
    /// File (if `ZONEWATCH_CONFIG` is set), then defaults, then environment.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = std::env::var("ZONEWATCH_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file_checked(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file_checked(file: ZonewatchConfigFile) -> Result<Self, ConfigError> {
        let zones = match &file.zones {
            Some(zones) => zones
                .iter()
                .map(|z| Zone::new(&z.name, z.polygon.clone()))
                .collect::<Result<Vec<_>, _>>()?,
            None => default_zones(),
        };
        let mut cfg = Self::from_file(file);
        cfg.zones = zones;
        Ok(cfg)
    }

    fn from_file(file: ZonewatchConfigFile) -> Self {
        let camera_file = file.camera.unwrap_or_default();
        let detection_file = file.detection.unwrap_or_default();
        let alerts_file = file.alerts.unwrap_or_default();
        let notify_file = file.notify.unwrap_or_default();
        let reconnect_default = ReconnectPolicy::default();

        Self {
            db_path: file
                .db_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH)),
            camera: CameraSettings {
                source: camera_file
                    .source
                    .unwrap_or_else(|| DEFAULT_CAMERA.to_string()),
                width: camera_file.width.unwrap_or(DEFAULT_WIDTH),
                height: camera_file.height.unwrap_or(DEFAULT_HEIGHT),
                fps: camera_file.fps.unwrap_or(DEFAULT_FPS),
            },
            reconnect: ReconnectPolicy {
                open_attempts: camera_file
                    .open_attempts
                    .unwrap_or(reconnect_default.open_attempts),
                reconnect_attempts: camera_file
                    .reconnect_attempts
                    .unwrap_or(reconnect_default.reconnect_attempts),
                retry_delay: camera_file
                    .retry_delay_ms
                    .map(Duration::from_millis)
                    .unwrap_or(reconnect_default.retry_delay),
            },
            detection: DetectionSettings {
                confidence_threshold: detection_file
                    .confidence_threshold
                    .unwrap_or(DEFAULT_CONFIDENCE),
                detect_every: detection_file.detect_every.unwrap_or(DEFAULT_DETECT_EVERY),
                detector_url: detection_file.detector_url,
                detector_timeout: Duration::from_millis(
                    detection_file
                        .detector_timeout_ms
                        .unwrap_or(DEFAULT_DETECTOR_TIMEOUT_MS),
                ),
            },
            alerts: AlertSettings {
                cooldown: Duration::from_secs(
                    alerts_file.cooldown_secs.unwrap_or(DEFAULT_COOLDOWN_SECS),
                ),
                recording_duration: Duration::from_secs(
                    alerts_file.recording_secs.unwrap_or(DEFAULT_RECORDING_SECS),
                ),
                clip_dir: alerts_file
                    .clip_dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_CLIP_DIR)),
                clip_quality: alerts_file.clip_quality.unwrap_or(DEFAULT_CLIP_QUALITY),
            },
            zones: default_zones(),
            notify: NotifySettings {
                telegram_bot_token: notify_file.telegram_bot_token,
                telegram_chat_id: notify_file.telegram_chat_id,
                email_relay_url: notify_file.email_relay_url,
                email_from: notify_file.email_from,
                alert_email: notify_file.alert_email,
                mqtt_broker_addr: notify_file.mqtt_broker_addr,
                mqtt_topic: notify_file
                    .mqtt_topic
                    .unwrap_or_else(|| DEFAULT_MQTT_TOPIC.to_string()),
            },
        }
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(camera) = env_string("ZONEWATCH_CAMERA") {
            self.camera.source = camera;
        }
        if let Some(path) = env_string("ZONEWATCH_DB_PATH") {
            self.db_path = PathBuf::from(path);
        }
        if let Some(raw) = env_string("ZONEWATCH_CONFIDENCE") {
            self.detection.confidence_threshold = raw.parse().map_err(|_| {
                ConfigError::Invalid("ZONEWATCH_CONFIDENCE must be a number in [0, 1]".into())
            })?;
        }
        if let Some(raw) = env_string("ZONEWATCH_COOLDOWN_SECS") {
            let seconds: u64 = raw.parse().map_err(|_| {
                ConfigError::Invalid(
                    "ZONEWATCH_COOLDOWN_SECS must be an integer number of seconds".into(),
                )
            })?;
            self.alerts.cooldown = Duration::from_secs(seconds);
        }
        if let Some(raw) = env_string("ZONEWATCH_RECORDING_SECS") {
            let seconds: u64 = raw.parse().map_err(|_| {
                ConfigError::Invalid(
                    "ZONEWATCH_RECORDING_SECS must be an integer number of seconds".into(),
                )
            })?;
            self.alerts.recording_duration = Duration::from_secs(seconds);
        }
        if let Some(dir) = env_string("ZONEWATCH_CLIP_DIR") {
            self.alerts.clip_dir = PathBuf::from(dir);
        }
        if let Some(url) = env_string("ZONEWATCH_DETECTOR_URL") {
            self.detection.detector_url = Some(url);
        }

        let notify = &mut self.notify;
        for (key, slot) in [
            ("TELEGRAM_BOT_TOKEN", &mut notify.telegram_bot_token),
            ("TELEGRAM_CHAT_ID", &mut notify.telegram_chat_id),
            ("EMAIL_RELAY_URL", &mut notify.email_relay_url),
            ("EMAIL_USER", &mut notify.email_from),
            ("ALERT_EMAIL", &mut notify.alert_email),
            ("MQTT_BROKER_ADDR", &mut notify.mqtt_broker_addr),
        ] {
            if let Some(value) = env_string(key) {
                *slot = Some(value);
            }
        }
        if let Some(topic) = env_string("MQTT_TOPIC") {
            notify.mqtt_topic = topic;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.zones.is_empty() {
            return Err(ConfigError::Invalid("at least one zone is required".into()));
        }
        let mut seen = HashSet::new();
        for zone in &self.zones {
            if !seen.insert(zone.name()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate zone name '{}'",
                    zone.name()
                )));
            }
        }

        let threshold = self.detection.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::Invalid(format!(
                "confidence threshold {} is outside [0, 1]",
                threshold
            )));
        }
        if self.detection.detect_every == 0 {
            return Err(ConfigError::Invalid("detect_every must be at least 1".into()));
        }
        if self.alerts.cooldown.is_zero() {
            return Err(ConfigError::Invalid("alert cooldown must be greater than zero".into()));
        }
        if self.alerts.recording_duration.is_zero() {
            return Err(ConfigError::Invalid(
                "recording duration must be greater than zero".into(),
            ));
        }
        if self.camera.fps == 0 || self.camera.width == 0 || self.camera.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "camera geometry {}x{} @ {} fps must be non-zero",
                self.camera.width, self.camera.height, self.camera.fps
            )));
        }
        if self.camera.source.trim().is_empty() {
            return Err(ConfigError::Invalid("camera source must not be empty".into()));
        }
        Ok(())
    }
}

fn default_zones() -> Vec<Zone> {
    [
        ("Main Entrance", 0.1, 0.1, 0.9, 0.9),
        ("Office Area", 0.3, 0.3, 0.7, 0.7),
    ]
    .into_iter()
    .filter_map(|(name, x0, y0, x1, y1)| Zone::rect(name, x0, y0, x1, y1).ok())
    .collect()
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn read_config_file(path: &Path) -> Result<ZonewatchConfigFile, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let parse_err = |detail: String| ConfigError::Parse {
        path: path.to_path_buf(),
        detail,
    };
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => toml::from_str(&raw).map_err(|e| parse_err(e.to_string())),
        _ => serde_json::from_str(&raw).map_err(|e| parse_err(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_reference_deployment() {
        let cfg = ZonewatchConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.camera.source, "stub://camera0");
        assert_eq!(cfg.detection.detect_every, 3);
        assert_eq!(cfg.alerts.cooldown, Duration::from_secs(30));
        assert_eq!(cfg.alerts.recording_duration, Duration::from_secs(10));
        let names: Vec<&str> = cfg.zones.iter().map(|z| z.name()).collect();
        assert_eq!(names, vec!["Main Entrance", "Office Area"]);
    }

    #[test]
    fn rejects_duplicate_zone_names() {
        let mut cfg = ZonewatchConfig::default();
        cfg.zones.push(Zone::rect("Office Area", 0.0, 0.0, 0.5, 0.5).unwrap());
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_out_of_range_threshold_and_zero_cadence() {
        let mut cfg = ZonewatchConfig::default();
        cfg.detection.confidence_threshold = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = ZonewatchConfig::default();
        cfg.detection.detect_every = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zone_file_entries_are_validated() {
        let file: ZonewatchConfigFile = serde_json::from_str(
            r#"{"zones": [{"name": "Dock", "coords": [[0.0, 0.0], [1.2, 0.0], [1.0, 1.0]]}]}"#,
        )
        .unwrap();
        assert!(matches!(
            ZonewatchConfig::from_file_checked(file),
            Err(ConfigError::Invalid(_))
        ));
    }
}
