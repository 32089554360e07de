//! `Surveillance`: wires capture, detection, alerting and notification into
//! one start/stop unit and exposes the read-only status surface.

use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{anyhow, Context, Result};

use crate::alert::{AlertCoordinator, SharedStore, SideEffect, StoredAlert};
use crate::capture::{open_device, CaptureDevice};
use crate::config::{NotifySettings, ZonewatchConfig};
use crate::detect::{detector_for, Detector};
use crate::error::PersistenceError;
use crate::frame::{Frame, FrameSlot};
use crate::notify::{
    EmailRelayChannel, MqttChannel, NotificationChannel, NotificationDispatcher, TelegramChannel,
};
use crate::pipeline::{DetectionLoop, DetectionPipeline};
use crate::recorder::IncidentRecorder;
use crate::source::{CameraState, FrameSource, SourceStats};
use crate::status::{DetectionObservation, StatusBoard, SystemStatus};
use crate::store::{AlertStats, AlertStore, SqliteAlertStore};

/// Everything `Surveillance` needs that touches the outside world.
pub struct Components {
    pub device: Box<dyn CaptureDevice>,
    pub detector: Box<dyn Detector>,
    pub store: Box<dyn AlertStore>,
    pub channels: Vec<Box<dyn NotificationChannel>>,
    /// Optional sink for side-effect completion reports.
    pub reports: Option<Sender<SideEffect>>,
}

impl Components {
    /// Real backends as described by `config`.
    pub fn from_config(config: &ZonewatchConfig) -> Result<Self> {
        let device = open_device(&config.camera)
            .with_context(|| format!("camera source {}", config.camera.source))?;
        let detector = detector_for(
            config.detection.detector_url.as_deref(),
            config.detection.detector_timeout,
        );
        let store = SqliteAlertStore::open(&config.db_path)
            .with_context(|| format!("open alert database {}", config.db_path.display()))?;
        Ok(Self {
            device,
            detector,
            store: Box::new(store),
            channels: channels_from(&config.notify),
            reports: None,
        })
    }
}

/// Notification channels in dispatch order. Unconfigured ones are kept so
/// their skip shows up in the outcomes.
pub fn channels_from(notify: &NotifySettings) -> Vec<Box<dyn NotificationChannel>> {
    vec![
        Box::new(EmailRelayChannel::new(
            notify.email_relay_url.clone(),
            notify.email_from.clone(),
            notify.alert_email.clone(),
        )),
        Box::new(TelegramChannel::new(
            notify.telegram_bot_token.clone(),
            notify.telegram_chat_id.clone(),
        )),
        Box::new(MqttChannel::new(
            notify.mqtt_broker_addr.as_deref(),
            Some(notify.mqtt_topic.clone()),
        )),
    ]
}

pub struct Surveillance {
    config: ZonewatchConfig,
    source: FrameSource,
    live_view: FrameSlot,
    status: Arc<StatusBoard>,
    store: SharedStore,
    coordinator: Arc<AlertCoordinator>,
    pipeline: Option<DetectionPipeline>,
    detection: Option<DetectionLoop>,
}

impl Surveillance {
    pub fn from_config(config: ZonewatchConfig) -> Result<Self> {
        let components = Components::from_config(&config)?;
        Ok(Self::with_components(config, components))
    }

    pub fn with_components(config: ZonewatchConfig, components: Components) -> Self {
        let source = FrameSource::new(components.device, config.reconnect.clone());
        let status = Arc::new(StatusBoard::new());
        let store: SharedStore = Arc::new(Mutex::new(components.store));
        let dispatcher = Arc::new(NotificationDispatcher::new(components.channels));
        log::info!(
            "notification channels: {} ({} configured)",
            dispatcher.channel_names().join(", "),
            dispatcher.configured_count()
        );

        let recorder = IncidentRecorder::new(config.alerts.clip_dir.clone())
            .with_quality(config.alerts.clip_quality);
        let mut coordinator = AlertCoordinator::new(
            Arc::clone(&store),
            dispatcher,
            Arc::clone(&status),
            config.alerts.cooldown,
        )
        .with_recording(
            recorder,
            source.handle().frame_slot(),
            config.alerts.recording_duration,
        );
        if let Some(reports) = components.reports {
            coordinator = coordinator.with_reports(reports);
        }

        let pipeline = DetectionPipeline::new(
            components.detector,
            config.zones.clone(),
            config.detection.confidence_threshold,
        );

        Self {
            config,
            source,
            live_view: FrameSlot::new(),
            status,
            store,
            coordinator: Arc::new(coordinator),
            pipeline: Some(pipeline),
            detection: None,
        }
    }

    pub fn config(&self) -> &ZonewatchConfig {
        &self.config
    }

    /// Open the camera and start the detection loop.
    ///
    /// A camera that cannot be opened leaves the system stopped with the
    /// camera reported as degraded. Calling `start` while the camera is
    /// degraded tears the stages down and tries the camera again.
    pub fn start(&mut self) -> Result<()> {
        if self.detection.is_some() {
            if self.source.state() != CameraState::Degraded {
                return Err(anyhow!("surveillance already running"));
            }
            log::warn!(
                "camera {} degraded while running; restarting capture",
                self.config.camera.source
            );
            self.stop();
        }
        let pipeline = self
            .pipeline
            .take()
            .ok_or_else(|| anyhow!("detection pipeline lost after a panic; rebuild the system"))?;

        if let Err(err) = self.source.start() {
            self.pipeline = Some(pipeline);
            return Err(err).context("camera unavailable");
        }

        let spawned = DetectionLoop::spawn(
            pipeline,
            self.source.handle(),
            Arc::clone(&self.coordinator),
            self.live_view.clone(),
            Arc::clone(&self.status),
            self.config.detection.detect_every,
        );
        match spawned {
            Ok(detection) => self.detection = Some(detection),
            Err(err) => {
                self.source.stop();
                return Err(err).context("spawn detection thread");
            }
        }
        self.status.set_running(true);
        log::info!(
            "surveillance started: camera {}, {} zones, cooldown {}s",
            self.config.camera.source,
            self.config.zones.len(),
            self.config.alerts.cooldown.as_secs()
        );
        Ok(())
    }

    /// Stop detection and capture, then wait for in-flight alert work.
    pub fn stop(&mut self) {
        if let Some(mut detection) = self.detection.take() {
            match detection.stop() {
                Some(pipeline) => self.pipeline = Some(pipeline),
                None => log::error!("detection pipeline lost; restart requires a rebuild"),
            }
        }
        self.source.stop();
        self.coordinator.shutdown();
        self.live_view.clear();
        self.status.set_running(false);
        log::info!("surveillance stopped");
    }

    pub fn is_running(&self) -> bool {
        self.detection.is_some()
    }

    pub fn status(&self) -> SystemStatus {
        self.status.snapshot(self.source.state())
    }

    /// Latest annotated frame, or the raw frame before detection has run.
    /// `None` whenever the camera has no current frame.
    pub fn live_frame(&self) -> Option<Arc<Frame>> {
        let raw = self.source.latest()?;
        Some(self.live_view.latest().unwrap_or(raw))
    }

    pub fn live_jpeg(&self, quality: u8) -> Option<Vec<u8>> {
        let frame = self.live_frame()?;
        match frame.to_jpeg(quality) {
            Ok(jpeg) => Some(jpeg),
            Err(err) => {
                log::warn!("live view frame {} not encodable: {}", frame.seq(), err);
                None
            }
        }
    }

    pub fn recent_detections(&self, limit: usize) -> Vec<DetectionObservation> {
        self.status.recent_detections(limit)
    }

    pub fn recent_alerts(&self, limit: usize) -> Result<Vec<StoredAlert>, PersistenceError> {
        self.store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .recent_alerts(limit)
    }

    pub fn alert_stats(&self) -> Result<AlertStats, PersistenceError> {
        self.store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stats(std::time::SystemTime::now())
    }

    pub fn source_stats(&self) -> SourceStats {
        self.source.stats()
    }

    pub fn coordinator(&self) -> &AlertCoordinator {
        &self.coordinator
    }
}

impl Drop for Surveillance {
    fn drop(&mut self) {
        if self.detection.is_some() {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CameraSettings, SyntheticCamera};
    use crate::detect::StubDetector;
    use crate::error::CameraError;
    use crate::source::ReconnectPolicy;
    use crate::store::InMemoryAlertStore;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::{Duration, Instant};

    /// Serves `budget` frames, then fails every read and every reopen until
    /// the budget is refilled.
    struct FadingCamera {
        budget: Arc<AtomicU32>,
        open: bool,
        seq: u64,
    }

    impl CaptureDevice for FadingCamera {
        fn open(&mut self) -> Result<(), CameraError> {
            if self.budget.load(Ordering::SeqCst) == 0 {
                return Err(CameraError::Open {
                    source_id: "fading".to_string(),
                    detail: "no such device".to_string(),
                });
            }
            self.open = true;
            Ok(())
        }

        fn read_frame(&mut self) -> Result<Frame, CameraError> {
            if !self.open {
                return Err(CameraError::NotOpen);
            }
            let took = self
                .budget
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |b| b.checked_sub(1));
            if took.is_err() {
                return Err(CameraError::Read {
                    source_id: "fading".to_string(),
                    detail: "unplugged".to_string(),
                });
            }
            std::thread::sleep(Duration::from_millis(10));
            self.seq += 1;
            Ok(Frame::filled(self.seq, 64, 48, [40, 40, 40]))
        }

        fn close(&mut self) {
            self.open = false;
        }

        fn describe(&self) -> String {
            "fading".to_string()
        }
    }

    fn wait_until<F: Fn() -> bool>(cond: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    fn config() -> ZonewatchConfig {
        let mut config = ZonewatchConfig::default();
        config.camera.width = 64;
        config.camera.height = 48;
        config.camera.fps = 50;
        config.detection.detect_every = 1;
        config
    }

    #[test]
    fn live_frame_falls_back_to_raw_and_stop_is_clean() {
        let config = config();
        let device = Box::new(SyntheticCamera::new(CameraSettings {
            source: "stub://test".into(),
            ..config.camera.clone()
        }));
        let mut system = Surveillance::with_components(
            config,
            Components {
                device,
                detector: Box::new(StubDetector::new()),
                store: Box::new(InMemoryAlertStore::new()),
                channels: Vec::new(),
                reports: None,
            },
        );
        assert!(system.live_frame().is_none());
        system.start().unwrap();
        assert!(system.start().is_err());

        let deadline = Instant::now() + Duration::from_secs(5);
        while system.status().frames_processed == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        let status = system.status();
        assert!(status.running);
        assert!(status.camera_connected);
        assert!(status.frames_processed > 0);
        assert!(system.live_frame().is_some());
        assert_eq!(system.live_jpeg(70).unwrap()[..2], [0xFF, 0xD8]);

        system.stop();
        let status = system.status();
        assert!(!status.running);
        assert_eq!(status.camera_state, CameraState::Stopped);
        assert!(!status.detection_active);
    }

    #[test]
    fn degraded_camera_blanks_the_live_view_and_can_be_restarted() {
        let budget = Arc::new(AtomicU32::new(20));
        let mut config = config();
        config.reconnect = ReconnectPolicy {
            open_attempts: 1,
            reconnect_attempts: 1,
            retry_delay: Duration::from_millis(5),
        };
        let mut system = Surveillance::with_components(
            config,
            Components {
                device: Box::new(FadingCamera {
                    budget: Arc::clone(&budget),
                    open: false,
                    seq: 0,
                }),
                detector: Box::new(StubDetector::new()),
                store: Box::new(InMemoryAlertStore::new()),
                channels: Vec::new(),
                reports: None,
            },
        );
        system.start().unwrap();

        assert!(wait_until(|| system.status().camera_state == CameraState::Degraded));
        std::thread::sleep(Duration::from_millis(300));
        assert!(system.status().frames_processed > 0);
        assert!(system.live_frame().is_none(), "no frame may be served without a camera");
        assert!(system.live_jpeg(70).is_none());

        // Still dead: the restart attempt fails and leaves the system stopped.
        assert!(system.start().is_err());
        assert!(!system.is_running());
        assert_eq!(system.status().camera_state, CameraState::Degraded);

        budget.store(1_000, Ordering::SeqCst);
        system.start().unwrap();
        assert!(system.is_running());
        assert!(wait_until(|| system.live_frame().is_some()));
        assert_eq!(system.status().camera_state, CameraState::Connected);
        system.stop();
    }

    #[test]
    fn default_channels_are_all_unconfigured() {
        let channels = channels_from(&NotifySettings::default());
        let names: Vec<&str> = channels.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["email", "telegram", "mqtt"]);
        assert!(channels.iter().all(|c| !c.is_configured()));
    }
}
