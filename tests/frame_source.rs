use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use zonewatch::{
    CameraError, CameraState, CaptureDevice, Frame, FrameSource, ReconnectPolicy,
};

/// Camera whose behaviour is decided per call.
struct ScriptedCamera {
    /// Opens that fail before the first success.
    failing_opens: u32,
    /// Reads that succeed after each open before the device "unplugs".
    reads_per_session: Option<u32>,
    /// Once true the device never opens again.
    dies_after_first_session: bool,
    opens: Arc<AtomicU32>,
    session_reads: u32,
    open: bool,
    seq: u64,
}

impl ScriptedCamera {
    fn healthy() -> Self {
        Self {
            failing_opens: 0,
            reads_per_session: None,
            dies_after_first_session: false,
            opens: Arc::new(AtomicU32::new(0)),
            session_reads: 0,
            open: false,
            seq: 0,
        }
    }
}

impl CaptureDevice for ScriptedCamera {
    fn open(&mut self) -> Result<(), CameraError> {
        let n = self.opens.fetch_add(1, Ordering::SeqCst);
        let dead = self.dies_after_first_session && n > self.failing_opens;
        if n < self.failing_opens || dead {
            return Err(CameraError::Open {
                source_id: "scripted".to_string(),
                detail: "device busy".to_string(),
            });
        }
        self.open = true;
        self.session_reads = 0;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        if !self.open {
            return Err(CameraError::NotOpen);
        }
        if let Some(limit) = self.reads_per_session {
            if self.session_reads >= limit {
                return Err(CameraError::Read {
                    source_id: "scripted".to_string(),
                    detail: "unplugged".to_string(),
                });
            }
        }
        self.session_reads += 1;
        self.seq += 1;
        thread::sleep(Duration::from_millis(2));
        Ok(Frame::filled(self.seq, 8, 8, [1, 2, 3]))
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

fn policy() -> ReconnectPolicy {
    ReconnectPolicy {
        open_attempts: 3,
        reconnect_attempts: 2,
        retry_delay: Duration::from_millis(5),
    }
}

fn wait_for<F: Fn() -> bool>(cond: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn opens_after_transient_failures() {
    let mut camera = ScriptedCamera::healthy();
    camera.failing_opens = 2;
    let opens = Arc::clone(&camera.opens);
    let mut source = FrameSource::new(Box::new(camera), policy());

    source.start().unwrap();
    assert_eq!(opens.load(Ordering::SeqCst), 3);
    assert!(wait_for(|| source.latest().is_some()));
    assert_eq!(source.state(), CameraState::Connected);
    source.stop();
}

#[test]
fn unopenable_camera_degrades_without_panicking() {
    let mut camera = ScriptedCamera::healthy();
    camera.failing_opens = u32::MAX;
    let opens = Arc::clone(&camera.opens);
    let mut source = FrameSource::new(Box::new(camera), policy());

    let err = source.start().unwrap_err();
    assert!(matches!(err, CameraError::Unavailable { attempts: 3, .. }));
    assert_eq!(opens.load(Ordering::SeqCst), 3);
    assert_eq!(source.state(), CameraState::Degraded);
    assert!(!source.is_connected());
    assert!(source.latest().is_none());
    assert!(source.stats().last_error.is_some());

    // The device is kept so a later start can try again.
    assert!(source.start().is_err());
    assert_eq!(opens.load(Ordering::SeqCst), 6);
}

#[test]
fn reconnects_after_a_read_failure() {
    let mut camera = ScriptedCamera::healthy();
    camera.reads_per_session = Some(5);
    let mut source = FrameSource::new(Box::new(camera), policy());
    source.start().unwrap();

    assert!(wait_for(|| source.stats().reconnects >= 2));
    let stats = source.stats();
    assert!(stats.read_failures >= 2);
    assert!(stats.frames_captured >= 10);
    source.stop();
    assert_eq!(source.state(), CameraState::Stopped);
}

#[test]
fn exhausted_reconnects_park_the_source_in_degraded_state() {
    let mut camera = ScriptedCamera::healthy();
    camera.reads_per_session = Some(3);
    camera.dies_after_first_session = true;
    let opens = Arc::clone(&camera.opens);
    let mut source = FrameSource::new(Box::new(camera), policy());
    source.start().unwrap();

    assert!(wait_for(|| source.state() == CameraState::Degraded));
    // One successful open plus the bounded reconnect attempts, no more.
    assert_eq!(opens.load(Ordering::SeqCst), 1 + 2);
    assert!(source.latest().is_none(), "stale frame must not be served");
    assert_eq!(source.stats().frames_captured, 3);
    source.stop();
}

#[test]
fn subscribers_only_see_the_newest_frame() {
    let camera = ScriptedCamera::healthy();
    let mut source = FrameSource::new(Box::new(camera), policy());
    let mut sub = source.subscribe();
    source.start().unwrap();

    let first = sub.next_timeout(Duration::from_secs(2)).unwrap();
    thread::sleep(Duration::from_millis(50));
    let later = sub.next_timeout(Duration::from_secs(2)).unwrap();
    assert!(later.seq() > first.seq() + 1, "slow reader skips intermediate frames");
    source.stop();
}
