//! Frames and the lossy hand-off between stages.
//!
//! - `Frame`: immutable RGB24 snapshot. Cloning shares the pixel buffer.
//! - `FrameSlot`: single "latest frame" cell. Each publish replaces the previous
//!   frame wholesale; readers always see a whole frame or nothing.
//! - `FrameSubscription`: lossy feed over a slot. A slow reader skips straight
//!   to the newest frame on its next poll and never accumulates a backlog.
//!
//! The capture loop is the only writer of the camera slot. Nothing here blocks
//! the writer beyond the short critical section of swapping an `Arc`.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime};

use image::codecs::jpeg::JpegEncoder;
use image::error::{ImageError, ParameterError, ParameterErrorKind};
use image::ExtendedColorType;

// ----------------------------------------------------------------------------
// Frame: immutable snapshot
// ----------------------------------------------------------------------------

/// Bytes per pixel for the RGB24 layout every capture backend normalizes to.
pub const RGB_CHANNELS: usize = 3;

#[derive(Clone, Debug)]
pub struct Frame {
    pixels: Arc<[u8]>,
    width: u32,
    height: u32,
    captured_at: SystemTime,
    seq: u64,
}

impl Frame {
    pub fn new(seq: u64, width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self::captured(seq, width, height, pixels, SystemTime::now())
    }

    pub fn captured(
        seq: u64,
        width: u32,
        height: u32,
        pixels: Vec<u8>,
        captured_at: SystemTime,
    ) -> Self {
        Self {
            pixels: pixels.into(),
            width,
            height,
            captured_at,
            seq,
        }
    }

    /// Solid-colour frame, handy for synthetic sources and tests.
    pub fn filled(seq: u64, width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let count = width as usize * height as usize;
        let mut pixels = Vec::with_capacity(count * RGB_CHANNELS);
        for _ in 0..count {
            pixels.extend_from_slice(&rgb);
        }
        Self::new(seq, width, height, pixels)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn captured_at(&self) -> SystemTime {
        self.captured_at
    }

    /// Monotonic capture sequence number assigned by the frame source.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// True when the buffer length matches `width * height * 3` and is non-empty.
    pub fn is_well_formed(&self) -> bool {
        let expected = (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|v| v.checked_mul(RGB_CHANNELS));
        matches!(expected, Some(n) if n > 0 && n == self.pixels.len())
    }

    /// Encode as baseline JPEG. A malformed buffer is an error, not a panic.
    pub fn to_jpeg(&self, quality: u8) -> Result<Vec<u8>, ImageError> {
        if !self.is_well_formed() {
            return Err(ImageError::Parameter(ParameterError::from_kind(
                ParameterErrorKind::DimensionMismatch,
            )));
        }
        let mut out = Vec::with_capacity(self.pixels.len() / 8);
        let mut encoder = JpegEncoder::new_with_quality(&mut out, quality);
        encoder.encode(&self.pixels, self.width, self.height, ExtendedColorType::Rgb8)?;
        Ok(out)
    }

    /// Derive a new frame with replaced pixels, keeping identity and timing.
    pub(crate) fn with_pixels(&self, pixels: Vec<u8>) -> Self {
        Self {
            pixels: pixels.into(),
            width: self.width,
            height: self.height,
            captured_at: self.captured_at,
            seq: self.seq,
        }
    }
}

// ----------------------------------------------------------------------------
// FrameSlot: copy-on-write latest-frame cell
// ----------------------------------------------------------------------------

struct SlotState {
    frame: Option<Arc<Frame>>,
    version: u64,
    closed: bool,
}

struct SlotShared {
    state: Mutex<SlotState>,
    changed: Condvar,
}

/// Shared single-frame cell. Cheap to clone; all clones see the same slot.
#[derive(Clone)]
pub struct FrameSlot {
    shared: Arc<SlotShared>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(SlotShared {
                state: Mutex::new(SlotState {
                    frame: None,
                    version: 0,
                    closed: false,
                }),
                changed: Condvar::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the current frame. Older frames are dropped, never queued.
    pub fn publish(&self, frame: Frame) {
        let mut state = self.lock();
        state.frame = Some(Arc::new(frame));
        state.version = state.version.wrapping_add(1);
        state.closed = false;
        drop(state);
        self.shared.changed.notify_all();
    }

    /// Current frame, if any. Repeated calls with no publish in between return the same frame.
    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.lock().frame.clone()
    }

    /// Number of publishes so far.
    pub fn version(&self) -> u64 {
        self.lock().version
    }

    /// Drop the current frame (e.g. camera lost). Subscribers keep waiting.
    pub fn clear(&self) {
        self.lock().frame = None;
    }

    /// Wake all subscribers and make them return `None` until the next publish.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.frame = None;
        drop(state);
        self.shared.changed.notify_all();
    }

    /// Lossy subscription starting after the current frame.
    pub fn subscribe(&self) -> FrameSubscription {
        FrameSubscription {
            slot: self.clone(),
            last_seen: self.version(),
        }
    }
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// FrameSubscription: lossy reader
// ----------------------------------------------------------------------------

pub struct FrameSubscription {
    slot: FrameSlot,
    last_seen: u64,
}

impl FrameSubscription {
    /// Wait up to `timeout` for a frame newer than the last one returned.
    ///
    /// Returns the newest frame at wake-up time; intermediate frames are skipped.
    /// Returns `None` on timeout or when the slot is closed.
    pub fn next_timeout(&mut self, timeout: Duration) -> Option<Arc<Frame>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.slot.lock();
        loop {
            if state.closed {
                return None;
            }
            if state.version != self.last_seen {
                if let Some(frame) = state.frame.clone() {
                    self.last_seen = state.version;
                    return Some(frame);
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self
                .slot
                .shared
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }

    /// True once the slot was closed and nothing has been published since.
    pub fn is_closed(&self) -> bool {
        self.slot.lock().closed
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn latest_is_idempotent_without_capture() {
        let slot = FrameSlot::new();
        assert!(slot.latest().is_none());

        slot.publish(Frame::filled(1, 4, 4, [10, 20, 30]));
        let a = slot.latest().unwrap();
        let b = slot.latest().unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        slot.publish(Frame::filled(2, 4, 4, [10, 20, 30]));
        let c = slot.latest().unwrap();
        assert_eq!(c.seq(), 2);
        // Earlier snapshot is untouched by the replacement.
        assert_eq!(a.seq(), 1);
    }

    #[test]
    fn subscription_skips_to_newest_frame() {
        let slot = FrameSlot::new();
        let mut sub = slot.subscribe();
        for seq in 1..=5 {
            slot.publish(Frame::filled(seq, 2, 2, [0, 0, 0]));
        }
        let frame = sub.next_timeout(Duration::from_millis(10)).unwrap();
        assert_eq!(frame.seq(), 5);
        assert!(sub.next_timeout(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn subscription_times_out_without_frames() {
        let slot = FrameSlot::new();
        let mut sub = slot.subscribe();
        assert!(sub.next_timeout(Duration::from_millis(20)).is_none());
    }

    #[test]
    fn subscription_does_not_replay_frame_present_at_subscribe() {
        let slot = FrameSlot::new();
        slot.publish(Frame::filled(1, 2, 2, [0, 0, 0]));
        let mut sub = slot.subscribe();
        assert!(sub.next_timeout(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn subscriber_wakes_on_publish_from_other_thread() {
        let slot = FrameSlot::new();
        let mut sub = slot.subscribe();
        let writer = slot.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            writer.publish(Frame::filled(7, 2, 2, [1, 2, 3]));
        });
        let frame = sub.next_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(frame.seq(), 7);
        handle.join().unwrap();
    }

    #[test]
    fn close_releases_waiting_subscribers() {
        let slot = FrameSlot::new();
        let mut sub = slot.subscribe();
        let closer = slot.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            closer.close();
        });
        assert!(sub.next_timeout(Duration::from_secs(2)).is_none());
        assert!(sub.is_closed());
        handle.join().unwrap();

        slot.publish(Frame::filled(1, 2, 2, [0, 0, 0]));
        assert!(!sub.is_closed());
    }

    #[test]
    fn well_formed_checks_buffer_length() {
        assert!(Frame::filled(0, 3, 2, [0, 0, 0]).is_well_formed());
        assert!(!Frame::new(0, 3, 2, vec![0; 5]).is_well_formed());
        assert!(!Frame::new(0, 0, 0, vec![]).is_well_formed());
    }

    #[test]
    fn encodes_jpeg() {
        let frame = Frame::filled(0, 16, 16, [200, 10, 10]);
        let jpeg = frame.to_jpeg(80).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert!(Frame::new(1, 4, 4, vec![0; 5]).to_jpeg(80).is_err());
    }
}
