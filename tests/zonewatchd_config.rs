use std::sync::Mutex;
use std::time::Duration;

use tempfile::{Builder, NamedTempFile};

use zonewatch::config::ZonewatchConfig;
use zonewatch::ConfigError;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "ZONEWATCH_CONFIG",
        "ZONEWATCH_CAMERA",
        "ZONEWATCH_DB_PATH",
        "ZONEWATCH_CONFIDENCE",
        "ZONEWATCH_COOLDOWN_SECS",
        "ZONEWATCH_RECORDING_SECS",
        "ZONEWATCH_CLIP_DIR",
        "ZONEWATCH_DETECTOR_URL",
        "TELEGRAM_BOT_TOKEN",
        "TELEGRAM_CHAT_ID",
        "EMAIL_RELAY_URL",
        "EMAIL_USER",
        "ALERT_EMAIL",
        "MQTT_BROKER_ADDR",
        "MQTT_TOPIC",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_json_config_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "db_path": "/var/lib/zonewatch/alerts.db",
        "camera": {
            "source": "rtsp://camera-1/stream",
            "width": 1280,
            "height": 720,
            "fps": 15,
            "reconnect_attempts": 2
        },
        "detection": {
            "confidence_threshold": 0.6,
            "detect_every": 5
        },
        "alerts": {
            "cooldown_secs": 45,
            "clip_dir": "/var/lib/zonewatch/clips"
        },
        "zones": [
            {"name": "Loading Dock", "coords": [[0.0, 0.5], [0.5, 0.5], [0.5, 1.0], [0.0, 1.0]]}
        ],
        "notify": {
            "telegram_chat_id": "1234"
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("ZONEWATCH_CONFIG", file.path());
    std::env::set_var("ZONEWATCH_COOLDOWN_SECS", "60");
    std::env::set_var("ZONEWATCH_DETECTOR_URL", "http://127.0.0.1:8500/detect");
    std::env::set_var("TELEGRAM_BOT_TOKEN", "123:abc");

    let cfg = ZonewatchConfig::load().expect("load config");

    assert_eq!(cfg.db_path.to_str(), Some("/var/lib/zonewatch/alerts.db"));
    assert_eq!(cfg.camera.source, "rtsp://camera-1/stream");
    assert_eq!(cfg.camera.width, 1280);
    assert_eq!(cfg.camera.height, 720);
    assert_eq!(cfg.camera.fps, 15);
    assert_eq!(cfg.reconnect.reconnect_attempts, 2);
    assert_eq!(cfg.reconnect.open_attempts, 3);
    assert_eq!(cfg.detection.confidence_threshold, 0.6);
    assert_eq!(cfg.detection.detect_every, 5);
    assert_eq!(
        cfg.detection.detector_url.as_deref(),
        Some("http://127.0.0.1:8500/detect")
    );
    assert_eq!(cfg.alerts.cooldown, Duration::from_secs(60));
    assert_eq!(cfg.alerts.recording_duration, Duration::from_secs(10));
    assert_eq!(cfg.zones.len(), 1);
    assert_eq!(cfg.zones[0].name(), "Loading Dock");
    assert_eq!(cfg.notify.telegram_bot_token.as_deref(), Some("123:abc"));
    assert_eq!(cfg.notify.telegram_chat_id.as_deref(), Some("1234"));
    assert_eq!(cfg.notify.mqtt_topic, "zonewatch/alerts");

    clear_env();
}

#[test]
fn loads_toml_config_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp config");
    let toml = r#"
db_path = "alerts.db"

[camera]
source = "http://10.0.0.20:81/stream"

[alerts]
recording_secs = 4

[notify]
mqtt_broker_addr = "mqtt://127.0.0.1:1883"
mqtt_topic = "site/alerts"
"#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");
    std::env::set_var("ZONEWATCH_CONFIG", file.path());
    std::env::set_var("MQTT_TOPIC", "site/override");

    let cfg = ZonewatchConfig::load().expect("load config");
    assert_eq!(cfg.camera.source, "http://10.0.0.20:81/stream");
    assert_eq!(cfg.alerts.recording_duration, Duration::from_secs(4));
    assert_eq!(
        cfg.notify.mqtt_broker_addr.as_deref(),
        Some("mqtt://127.0.0.1:1883")
    );
    assert_eq!(cfg.notify.mqtt_topic, "site/override");
    let names: Vec<&str> = cfg.zones.iter().map(|z| z.name()).collect();
    assert_eq!(names, vec!["Main Entrance", "Office Area"]);

    clear_env();
}

#[test]
fn defaults_without_a_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = ZonewatchConfig::load().expect("load defaults");
    assert_eq!(cfg.camera.source, "stub://camera0");
    assert_eq!(cfg.db_path.to_str(), Some("database/surveillance.db"));
    assert_eq!(cfg.alerts.clip_dir.to_str(), Some("static/uploads"));
    assert_eq!(cfg.detection.confidence_threshold, 0.5);
    assert!(cfg.detection.detector_url.is_none());
}

#[test]
fn rejects_invalid_overrides_and_files() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("ZONEWATCH_CONFIDENCE", "very");
    assert!(matches!(
        ZonewatchConfig::load(),
        Err(ConfigError::Invalid(_))
    ));
    std::env::set_var("ZONEWATCH_CONFIDENCE", "1.5");
    assert!(ZonewatchConfig::load().is_err());
    std::env::remove_var("ZONEWATCH_CONFIDENCE");

    std::env::set_var("ZONEWATCH_COOLDOWN_SECS", "0");
    assert!(ZonewatchConfig::load().is_err());
    std::env::remove_var("ZONEWATCH_COOLDOWN_SECS");

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, b"{ not json").expect("write config");
    std::env::set_var("ZONEWATCH_CONFIG", file.path());
    assert!(matches!(
        ZonewatchConfig::load(),
        Err(ConfigError::Parse { .. })
    ));

    let mut file = NamedTempFile::new().expect("temp config");
    let dup = r#"{"zones": [
        {"name": "Gate", "coords": [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]]},
        {"name": "Gate", "coords": [[0.0, 0.0], [0.5, 0.0], [0.5, 0.5]]}
    ]}"#;
    std::io::Write::write_all(&mut file, dup.as_bytes()).expect("write config");
    std::env::set_var("ZONEWATCH_CONFIG", file.path());
    assert!(matches!(
        ZonewatchConfig::load(),
        Err(ConfigError::Invalid(_))
    ));

    std::env::set_var("ZONEWATCH_CONFIG", "/nonexistent/zonewatch.json");
    assert!(matches!(
        ZonewatchConfig::load(),
        Err(ConfigError::Read { .. })
    ));

    clear_env();
}
