//! DetectionPipeline: frames in, zone-intrusion events out.
//!
//! `tick` is the pure per-frame step. `DetectionLoop` drives it on its own
//! thread from a lossy frame subscription, running the detector on every Nth
//! frame and publishing an annotated live view for every frame.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use crate::alert::AlertCoordinator;
use crate::detect::{Detection, Detector};
use crate::frame::{Frame, FrameSlot};
use crate::overlay::annotate;
use crate::source::SourceHandle;
use crate::status::{DetectionObservation, StatusBoard};
use crate::zone::Zone;

/// Poll interval for the frame subscription; bounds shutdown latency.
const FRAME_WAIT: Duration = Duration::from_millis(200);

/// A person detection whose box centre lies inside a zone.
#[derive(Clone, Debug, PartialEq)]
pub struct IntrusionEvent {
    pub detection: Detection,
    pub zone: Zone,
    pub frame_dims: (u32, u32),
    pub observed_at: SystemTime,
}

pub struct DetectionPipeline {
    detector: Box<dyn Detector>,
    zones: Vec<Zone>,
    confidence_threshold: f32,
    last_persons: Vec<Detection>,
    ticks: u64,
    failures: u64,
}

impl DetectionPipeline {
    pub fn new(detector: Box<dyn Detector>, zones: Vec<Zone>, confidence_threshold: f32) -> Self {
        Self {
            detector,
            zones,
            confidence_threshold,
            last_persons: Vec::new(),
            ticks: 0,
            failures: 0,
        }
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    /// Person detections from the most recent successful tick.
    pub fn last_detections(&self) -> &[Detection] {
        &self.last_persons
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Detect, keep confident persons, and test each against every zone.
    ///
    /// Events come out detection-major, zones in configuration order. A
    /// detector failure yields no events for this tick.
    pub fn tick(&mut self, frame: &Frame) -> Vec<IntrusionEvent> {
        self.ticks += 1;
        let detections = match self.detector.detect(frame) {
            Ok(detections) => detections,
            Err(err) => {
                self.failures += 1;
                log::warn!(
                    "detector {}: frame {} skipped: {}",
                    self.detector.name(),
                    frame.seq(),
                    err
                );
                self.last_persons.clear();
                return Vec::new();
            }
        };

        let persons: Vec<Detection> = detections
            .into_iter()
            .filter(|d| d.is_person() && d.confidence >= self.confidence_threshold)
            .collect();

        let (width, height) = (frame.width(), frame.height());
        let mut events = Vec::new();
        for detection in &persons {
            let center = detection.bbox.center();
            for zone in &self.zones {
                if zone.contains_pixel(center, width, height) {
                    events.push(IntrusionEvent {
                        detection: detection.clone(),
                        zone: zone.clone(),
                        frame_dims: (width, height),
                        observed_at: frame.captured_at(),
                    });
                }
            }
        }
        self.last_persons = persons;
        events
    }

    /// Frame with zones and the latest person boxes drawn.
    pub fn annotate(&self, frame: &Frame) -> Frame {
        annotate(frame, &self.zones, &self.last_persons)
    }
}

/// Running detection thread.
pub struct DetectionLoop {
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<DetectionPipeline>>,
}

impl DetectionLoop {
    /// Spawn the loop. `cadence` is the detect-every-Nth-frame divisor.
    pub fn spawn(
        pipeline: DetectionPipeline,
        source: SourceHandle,
        coordinator: Arc<AlertCoordinator>,
        live_view: FrameSlot,
        status: Arc<StatusBoard>,
        cadence: u32,
    ) -> std::io::Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);
        let worker = thread::Builder::new()
            .name("zonewatch-detect".to_string())
            .spawn(move || {
                let mut pipeline = pipeline;
                run(
                    &mut pipeline,
                    &source,
                    &coordinator,
                    &live_view,
                    &status,
                    cadence.max(1),
                    &flag,
                );
                pipeline
            })?;
        Ok(Self {
            shutdown,
            worker: Some(worker),
        })
    }

    /// Ask the loop to exit after its current tick and wait for it.
    pub fn stop(&mut self) -> Option<DetectionPipeline> {
        self.shutdown.store(true, Ordering::SeqCst);
        let worker = self.worker.take()?;
        match worker.join() {
            Ok(pipeline) => Some(pipeline),
            Err(_) => {
                log::error!("detection thread panicked");
                None
            }
        }
    }
}

impl Drop for DetectionLoop {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.stop();
        }
    }
}

fn run(
    pipeline: &mut DetectionPipeline,
    source: &SourceHandle,
    coordinator: &AlertCoordinator,
    live_view: &FrameSlot,
    status: &StatusBoard,
    cadence: u32,
    shutdown: &AtomicBool,
) {
    let mut frames = source.subscribe();
    let mut received: u64 = 0;
    status.set_detection_active(true);
    log::info!(
        "detection loop started: {} zones, every {} frame(s)",
        pipeline.zones().len(),
        cadence
    );

    while !shutdown.load(Ordering::SeqCst) {
        let Some(frame) = frames.next_timeout(FRAME_WAIT) else {
            // No camera frame any more (degraded or stopped): drop the
            // annotated view too so it never outlives its source.
            if source.latest().is_none() {
                live_view.clear();
            }
            if frames.is_closed() {
                thread::sleep(FRAME_WAIT);
            }
            continue;
        };
        received += 1;

        if received % cadence as u64 == 0 {
            let events = pipeline.tick(&frame);
            status.record_frame_processed(pipeline.last_detections().len());
            for event in &events {
                let accepted = coordinator.evaluate(event);
                status.record_observation(DetectionObservation {
                    zone_name: event.zone.name().to_string(),
                    confidence: event.detection.confidence,
                    bbox: event.detection.bbox,
                    observed_at: event.observed_at,
                    alerted: accepted.is_some(),
                });
            }
        }

        live_view.publish(pipeline.annotate(&frame));
    }

    status.set_detection_active(false);
    log::info!(
        "detection loop stopped after {} ticks ({} detector failures)",
        pipeline.ticks(),
        pipeline.failures()
    );
}
