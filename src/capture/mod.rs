//! Capture devices.
//!
//! A `CaptureDevice` is the exclusive handle on one camera. Only the frame
//! source's capture loop owns it; every other stage sees frames through the
//! shared slot.
//!
//! Backends, selected from the camera source identifier:
//! - `stub://...`: synthetic moving scene (always available, used in tests)
//! - `http://...` / `https://...`: MJPEG-over-HTTP or single-JPEG snapshot cameras
//! - `rtsp://...`: GStreamer (feature: capture-rtsp)
//! - `/dev/videoN` or a bare device index `N`: V4L2 (feature: capture-v4l2)

mod mjpeg;
#[cfg(feature = "capture-rtsp")]
mod rtsp;
mod synthetic;
#[cfg(feature = "capture-v4l2")]
mod v4l2;

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::CameraError;
use crate::frame::Frame;

pub use mjpeg::{split_jpeg_frames, MjpegHttpCamera};
pub use synthetic::SyntheticCamera;

/// Exclusive handle on a frame-producing device.
pub trait CaptureDevice: Send {
    /// Acquire the device. Calling `open` on an open device reopens it.
    fn open(&mut self) -> Result<(), CameraError>;

    /// Block until the next frame is available (bounded by a backend timeout).
    fn read_frame(&mut self) -> Result<Frame, CameraError>;

    /// Release the device. Safe to call when already closed.
    fn close(&mut self);

    /// Human-readable source identifier for logs.
    fn describe(&self) -> String;
}

/// Camera source and requested geometry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraSettings {
    /// Source identifier (URL, device path or index).
    pub source: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            source: "stub://camera0".to_string(),
            width: 640,
            height: 480,
            fps: 30,
        }
    }
}

impl CameraSettings {
    /// Target interval between frames.
    pub fn frame_interval(&self) -> Duration {
        if self.fps == 0 {
            return Duration::from_millis(100);
        }
        Duration::from_millis(1000 / self.fps as u64)
    }

    /// How long a backend may block waiting for one frame.
    pub fn read_timeout(&self) -> Duration {
        let base_ms = if self.fps == 0 {
            500
        } else {
            (1000 / self.fps as u64).saturating_mul(4)
        };
        Duration::from_millis(base_ms.max(500))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SourceKind {
    Synthetic,
    Http,
    Rtsp,
    V4l2,
}

fn classify(source: &str) -> Result<SourceKind, CameraError> {
    let trimmed = source.trim();
    if trimmed.starts_with("/dev/video") || trimmed.parse::<u32>().is_ok() {
        return Ok(SourceKind::V4l2);
    }
    let url = Url::parse(trimmed).map_err(|_| CameraError::Unsupported(source.to_string()))?;
    match url.scheme() {
        "stub" => Ok(SourceKind::Synthetic),
        "http" | "https" => Ok(SourceKind::Http),
        "rtsp" | "rtsps" => Ok(SourceKind::Rtsp),
        _ => Err(CameraError::Unsupported(source.to_string())),
    }
}

/// Build the capture backend for `settings.source`. The device is not opened.
pub fn open_device(settings: &CameraSettings) -> Result<Box<dyn CaptureDevice>, CameraError> {
    match classify(&settings.source)? {
        SourceKind::Synthetic => Ok(Box::new(SyntheticCamera::new(settings.clone()))),
        SourceKind::Http => Ok(Box::new(MjpegHttpCamera::new(settings.clone()))),
        SourceKind::Rtsp => {
            #[cfg(feature = "capture-rtsp")]
            {
                Ok(Box::new(rtsp::RtspCamera::new(settings.clone())?))
            }
            #[cfg(not(feature = "capture-rtsp"))]
            {
                log::error!(
                    "camera {}: RTSP requires the capture-rtsp feature",
                    settings.source
                );
                Err(CameraError::Unsupported(settings.source.clone()))
            }
        }
        SourceKind::V4l2 => {
            #[cfg(feature = "capture-v4l2")]
            {
                Ok(Box::new(v4l2::V4l2Camera::new(settings.clone())))
            }
            #[cfg(not(feature = "capture-v4l2"))]
            {
                log::error!(
                    "camera {}: local devices require the capture-v4l2 feature",
                    settings.source
                );
                Err(CameraError::Unsupported(settings.source.clone()))
            }
        }
    }
}

/// Result of a bounded camera probe.
#[derive(Clone, Debug, Serialize)]
pub struct ProbeReport {
    pub source: String,
    pub frames: u64,
    pub width: u32,
    pub height: u32,
    pub elapsed: Duration,
}

impl ProbeReport {
    pub fn fps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.frames as f64 / secs
    }
}

/// Open the camera, read for `window`, and report what came back.
///
/// Fails only if the device cannot be opened or yields no frame at all.
pub fn probe_camera(
    settings: &CameraSettings,
    window: Duration,
) -> Result<ProbeReport, CameraError> {
    let mut device = open_device(settings)?;
    probe_device(device.as_mut(), window)
}

pub(crate) fn probe_device<D: CaptureDevice + ?Sized>(
    device: &mut D,
    window: Duration,
) -> Result<ProbeReport, CameraError> {
    device.open()?;
    let started = Instant::now();
    let mut frames = 0u64;
    let mut dims = (0, 0);
    let mut last_error = None;
    while started.elapsed() < window {
        match device.read_frame() {
            Ok(frame) => {
                frames += 1;
                dims = (frame.width(), frame.height());
            }
            Err(err) => {
                log::warn!("probe {}: {}", device.describe(), err);
                last_error = Some(err);
                break;
            }
        }
    }
    let elapsed = started.elapsed();
    let source = device.describe();
    device.close();

    if frames == 0 {
        return Err(last_error.unwrap_or(CameraError::Read {
            source_id: source,
            detail: "no frames within probe window".to_string(),
        }));
    }
    Ok(ProbeReport {
        source,
        frames,
        width: dims.0,
        height: dims.1,
        elapsed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_sources() {
        assert_eq!(classify("stub://camera0").unwrap(), SourceKind::Synthetic);
        assert_eq!(classify("http://10.0.0.5/stream").unwrap(), SourceKind::Http);
        assert_eq!(classify("rtsp://10.0.0.5:554/h264").unwrap(), SourceKind::Rtsp);
        assert_eq!(classify("/dev/video2").unwrap(), SourceKind::V4l2);
        assert_eq!(classify("0").unwrap(), SourceKind::V4l2);
        assert!(matches!(
            classify("ftp://nope"),
            Err(CameraError::Unsupported(_))
        ));
        assert!(matches!(
            classify("not a camera"),
            Err(CameraError::Unsupported(_))
        ));
    }

    #[test]
    fn stub_device_is_always_available() {
        let settings = CameraSettings {
            source: "stub://test".to_string(),
            width: 64,
            height: 48,
            fps: 30,
        };
        let mut device = open_device(&settings).unwrap();
        device.open().unwrap();
        let frame = device.read_frame().unwrap();
        assert_eq!((frame.width(), frame.height()), (64, 48));
        assert!(frame.is_well_formed());
        device.close();
    }

    #[test]
    fn probe_reports_frames() {
        let settings = CameraSettings {
            source: "stub://probe".to_string(),
            width: 32,
            height: 24,
            fps: 200,
        };
        let report = probe_camera(&settings, Duration::from_millis(50)).unwrap();
        assert!(report.frames > 0);
        assert_eq!((report.width, report.height), (32, 24));
        assert_eq!(report.source, "stub://probe");
    }

    #[cfg(not(feature = "capture-rtsp"))]
    #[test]
    fn rtsp_without_feature_is_unsupported() {
        let settings = CameraSettings {
            source: "rtsp://127.0.0.1/stream".to_string(),
            ..CameraSettings::default()
        };
        assert!(matches!(
            open_device(&settings),
            Err(CameraError::Unsupported(_))
        ));
    }
}
