//! FrameSource: owns the capture device and feeds the latest-frame slot.
//!
//! A dedicated thread reads the device at its native rate and replaces the
//! slot on every successful read. Read failures close the device, back off
//! for a fixed delay and reopen it, for a bounded number of attempts. When
//! those are exhausted the source parks in the degraded state and the
//! capture thread exits; nothing downstream is blocked or torn down.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::capture::{open_device, CameraSettings, CaptureDevice};
use crate::error::CameraError;
use crate::frame::{Frame, FrameSlot, FrameSubscription};

/// Granularity of interruptible sleeps so `stop()` is observed promptly.
const STOP_POLL: Duration = Duration::from_millis(20);

/// Bounded retry policy for opening and reopening the device.
#[derive(Clone, Debug, PartialEq)]
pub struct ReconnectPolicy {
    /// Attempts made by `start()` before reporting the camera unavailable.
    pub open_attempts: u32,
    /// Reopen attempts after a failed read before giving up.
    pub reconnect_attempts: u32,
    /// Fixed delay between attempts.
    pub retry_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            open_attempts: 3,
            reconnect_attempts: 5,
            retry_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraState {
    Stopped,
    Connected,
    Reconnecting,
    /// Device could not be (re)opened within the policy; no camera.
    Degraded,
}

impl CameraState {
    fn to_u8(self) -> u8 {
        match self {
            CameraState::Stopped => 0,
            CameraState::Connected => 1,
            CameraState::Reconnecting => 2,
            CameraState::Degraded => 3,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => CameraState::Connected,
            2 => CameraState::Reconnecting,
            3 => CameraState::Degraded,
            _ => CameraState::Stopped,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SourceStats {
    pub source: String,
    pub state: CameraState,
    pub frames_captured: u64,
    pub read_failures: u64,
    pub reconnects: u64,
    pub last_error: Option<String>,
}

struct SourceShared {
    describe: String,
    state: AtomicU8,
    shutdown: AtomicBool,
    frames_captured: AtomicU64,
    read_failures: AtomicU64,
    reconnects: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl SourceShared {
    fn set_state(&self, state: CameraState) {
        self.state.store(state.to_u8(), Ordering::SeqCst);
    }

    fn state(&self) -> CameraState {
        CameraState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn record_error(&self, err: &CameraError) {
        *self
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(err.to_string());
    }

    fn stopping(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Sleep for `total` unless shutdown is requested. Returns false if interrupted.
    fn sleep(&self, total: Duration) -> bool {
        let deadline = Instant::now() + total;
        loop {
            if self.stopping() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(STOP_POLL.min(deadline - now));
        }
    }
}

/// Cloneable read-only view of a running source.
#[derive(Clone)]
pub struct SourceHandle {
    slot: FrameSlot,
    shared: Arc<SourceShared>,
}

impl SourceHandle {
    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.slot.latest()
    }

    pub fn subscribe(&self) -> FrameSubscription {
        self.slot.subscribe()
    }

    /// The raw frame slot this source publishes into.
    pub fn frame_slot(&self) -> FrameSlot {
        self.slot.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state() == CameraState::Connected
    }

    pub fn state(&self) -> CameraState {
        self.shared.state()
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            source: self.shared.describe.clone(),
            state: self.shared.state(),
            frames_captured: self.shared.frames_captured.load(Ordering::Relaxed),
            read_failures: self.shared.read_failures.load(Ordering::Relaxed),
            reconnects: self.shared.reconnects.load(Ordering::Relaxed),
            last_error: self
                .shared
                .last_error
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }
}

pub struct FrameSource {
    device: Option<Box<dyn CaptureDevice>>,
    policy: ReconnectPolicy,
    handle: SourceHandle,
    worker: Option<JoinHandle<Box<dyn CaptureDevice>>>,
}

impl FrameSource {
    pub fn new(device: Box<dyn CaptureDevice>, policy: ReconnectPolicy) -> Self {
        let shared = Arc::new(SourceShared {
            describe: device.describe(),
            state: AtomicU8::new(CameraState::Stopped.to_u8()),
            shutdown: AtomicBool::new(false),
            frames_captured: AtomicU64::new(0),
            read_failures: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            last_error: Mutex::new(None),
        });
        Self {
            device: Some(device),
            policy,
            handle: SourceHandle {
                slot: FrameSlot::new(),
                shared,
            },
            worker: None,
        }
    }

    pub fn from_settings(
        settings: &CameraSettings,
        policy: ReconnectPolicy,
    ) -> Result<Self, CameraError> {
        Ok(Self::new(open_device(settings)?, policy))
    }

    /// Open the device (bounded attempts) and start the capture thread.
    ///
    /// On failure the source is left in `CameraState::Degraded` and may be
    /// started again later.
    pub fn start(&mut self) -> Result<(), CameraError> {
        if self.worker.is_some() {
            return Err(CameraError::AlreadyRunning);
        }
        let mut device = self.device.take().ok_or(CameraError::AlreadyRunning)?;
        let shared = Arc::clone(&self.handle.shared);
        shared.shutdown.store(false, Ordering::SeqCst);

        let opened = open_with_retry(
            device.as_mut(),
            &shared,
            self.policy.open_attempts,
            self.policy.retry_delay,
        );
        if let Err(err) = opened {
            shared.set_state(CameraState::Degraded);
            shared.record_error(&err);
            log::error!("camera {}: {}; running without camera", shared.describe, err);
            self.device = Some(device);
            return Err(err);
        }
        shared.set_state(CameraState::Connected);

        let slot = self.handle.slot.clone();
        let policy = self.policy.clone();
        let spawned = thread::Builder::new()
            .name("zonewatch-capture".to_string())
            .spawn(move || {
                capture_loop(device.as_mut(), &slot, &shared, &policy);
                device.close();
                device
            });
        match spawned {
            Ok(worker) => {
                self.worker = Some(worker);
                Ok(())
            }
            Err(err) => {
                self.handle.shared.set_state(CameraState::Degraded);
                Err(CameraError::Open {
                    source_id: self.handle.shared.describe.clone(),
                    detail: format!("spawn capture thread: {}", err),
                })
            }
        }
    }

    /// Signal the capture loop and wait for it to finish its current read.
    pub fn stop(&mut self) {
        let shared = &self.handle.shared;
        shared.shutdown.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            match worker.join() {
                Ok(device) => self.device = Some(device),
                Err(_) => log::error!("camera {}: capture thread panicked", shared.describe),
            }
        }
        shared.set_state(CameraState::Stopped);
        self.handle.slot.close();
    }

    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.handle.latest()
    }

    pub fn subscribe(&self) -> FrameSubscription {
        self.handle.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.handle.is_connected()
    }

    pub fn state(&self) -> CameraState {
        self.handle.state()
    }

    pub fn stats(&self) -> SourceStats {
        self.handle.stats()
    }

    pub fn handle(&self) -> SourceHandle {
        self.handle.clone()
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.stop();
        }
    }
}

fn open_with_retry(
    device: &mut dyn CaptureDevice,
    shared: &SourceShared,
    attempts: u32,
    delay: Duration,
) -> Result<(), CameraError> {
    let attempts = attempts.max(1);
    for attempt in 1..=attempts {
        match device.open() {
            Ok(()) => return Ok(()),
            Err(err) => {
                log::warn!(
                    "camera {}: open attempt {}/{} failed: {}",
                    shared.describe,
                    attempt,
                    attempts,
                    err
                );
                shared.record_error(&err);
            }
        }
        if attempt < attempts && !shared.sleep(delay) {
            break;
        }
    }
    Err(CameraError::Unavailable {
        source_id: shared.describe.clone(),
        attempts,
    })
}

fn capture_loop(
    device: &mut dyn CaptureDevice,
    slot: &FrameSlot,
    shared: &SourceShared,
    policy: &ReconnectPolicy,
) {
    log::info!("camera {}: capture loop started", shared.describe);
    while !shared.stopping() {
        match device.read_frame() {
            Ok(frame) => {
                slot.publish(frame);
                shared.frames_captured.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                shared.read_failures.fetch_add(1, Ordering::Relaxed);
                shared.record_error(&err);
                log::warn!("camera {}: read failed: {}", shared.describe, err);
                if shared.stopping() {
                    break;
                }

                shared.set_state(CameraState::Reconnecting);
                device.close();
                if !shared.sleep(policy.retry_delay) {
                    break;
                }
                log::info!("camera {}: reconnecting", shared.describe);
                match open_with_retry(
                    device,
                    shared,
                    policy.reconnect_attempts,
                    policy.retry_delay,
                ) {
                    Ok(()) => {
                        shared.reconnects.fetch_add(1, Ordering::Relaxed);
                        shared.set_state(CameraState::Connected);
                        log::info!("camera {}: reconnected", shared.describe);
                    }
                    Err(err) => {
                        if shared.stopping() {
                            break;
                        }
                        shared.record_error(&err);
                        shared.set_state(CameraState::Degraded);
                        slot.clear();
                        log::error!("camera {}: {}; capture stopped", shared.describe, err);
                        return;
                    }
                }
            }
        }
    }
    log::info!("camera {}: capture loop stopped", shared.describe);
}
