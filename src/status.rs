//! Read-only status surface for the presentation layer.
//!
//! Every stage writes its own counters; readers take a `SystemStatus`
//! snapshot. The recent-detection feed is a bounded ring buffer, newest first.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

use serde::Serialize;

use crate::alert::{epoch_ms, AlertRecord};
use crate::detect::BoundingBox;
use crate::source::CameraState;

pub const DETECTION_FEED_CAPACITY: usize = 100;

/// One intrusion observation, whether or not it became an alert.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetectionObservation {
    pub zone_name: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    #[serde(with = "epoch_ms")]
    pub observed_at: SystemTime,
    /// True when the coordinator accepted it as an alert.
    pub alerted: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct SystemStatus {
    pub running: bool,
    pub camera_connected: bool,
    pub camera_state: CameraState,
    pub detection_active: bool,
    pub alert_count: u64,
    pub last_alert: Option<AlertRecord>,
    pub detection_count: u64,
    pub last_detection: Option<DetectionObservation>,
    pub frames_processed: u64,
    pub persons_in_view: u64,
}

#[derive(Default)]
pub struct StatusBoard {
    running: AtomicBool,
    detection_active: AtomicBool,
    alert_count: AtomicU64,
    detection_count: AtomicU64,
    frames_processed: AtomicU64,
    persons_in_view: AtomicU64,
    last_alert: Mutex<Option<AlertRecord>>,
    feed: Mutex<VecDeque<DetectionObservation>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn set_detection_active(&self, active: bool) {
        self.detection_active.store(active, Ordering::SeqCst);
    }

    pub fn record_frame_processed(&self, persons: usize) {
        self.frames_processed.fetch_add(1, Ordering::Relaxed);
        self.persons_in_view.store(persons as u64, Ordering::Relaxed);
    }

    pub fn record_alert(&self, record: &AlertRecord) {
        self.alert_count.fetch_add(1, Ordering::SeqCst);
        *self
            .last_alert
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(record.clone());
    }

    pub fn record_observation(&self, observation: DetectionObservation) {
        self.detection_count.fetch_add(1, Ordering::Relaxed);
        let mut feed = self.feed.lock().unwrap_or_else(PoisonError::into_inner);
        if feed.len() == DETECTION_FEED_CAPACITY {
            feed.pop_back();
        }
        feed.push_front(observation);
    }

    /// Up to `limit` recent observations, newest first.
    pub fn recent_detections(&self, limit: usize) -> Vec<DetectionObservation> {
        self.feed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn alert_count(&self) -> u64 {
        self.alert_count.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self, camera: CameraState) -> SystemStatus {
        SystemStatus {
            running: self.running.load(Ordering::SeqCst),
            camera_connected: camera == CameraState::Connected,
            camera_state: camera,
            detection_active: self.detection_active.load(Ordering::SeqCst),
            alert_count: self.alert_count.load(Ordering::SeqCst),
            last_alert: self
                .last_alert
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            detection_count: self.detection_count.load(Ordering::Relaxed),
            last_detection: self
                .feed
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .front()
                .cloned(),
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            persons_in_view: self.persons_in_view.load(Ordering::Relaxed),
        }
    }
}
