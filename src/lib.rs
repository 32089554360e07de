//! zonewatch
//!
//! Real-time zone intrusion surveillance: a camera feed is scanned for
//! people, every person whose box centre falls inside an operator-defined
//! restricted zone becomes an intrusion event, and events are deduplicated
//! per zone into alerts that are persisted, recorded as a short clip and
//! fanned out to notification channels.
//!
//! # Architecture
//!
//! Independent long-lived loops share state through locks and slots, never
//! through a single event loop:
//!
//! 1. **Capture**: `FrameSource` owns the camera and replaces the latest
//!    frame in a `FrameSlot`. Read failures trigger bounded reconnects; when
//!    those run out the camera is reported degraded.
//! 2. **Detection**: `DetectionLoop` runs the `Detector` on every Nth frame
//!    and tests each confident person against the configured `Zone`s.
//! 3. **Alerting**: `AlertCoordinator` applies the per-zone cooldown,
//!    persists accepted alerts synchronously and starts recording and
//!    notification on background threads.
//! 4. **Presentation**: `StatusBoard` snapshots, the recent detection feed
//!    and the annotated live view are read-only surfaces for a UI.
//!
//! # Module Structure
//!
//! - `capture`: camera backends (synthetic, HTTP MJPEG, RTSP, V4L2) and probe
//! - `source`: capture loop, reconnect policy, camera state
//! - `frame`: frames, the latest-frame slot and lossy subscriptions
//! - `zone`: restricted zones and point-in-polygon
//! - `detect`: detector capability and backends
//! - `pipeline`: per-frame tick and the detection loop
//! - `alert`: alert records, cooldown table, coordinator
//! - `recorder`: incident clips
//! - `notify`: notification dispatcher and channels
//! - `store`: alert persistence
//! - `status`: status snapshot and detection feed
//! - `system`: the assembled `Surveillance` unit

pub mod alert;
pub mod capture;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod notify;
pub mod overlay;
pub mod pipeline;
pub mod recorder;
pub mod source;
pub mod status;
pub mod store;
pub mod system;
pub mod zone;

#[cfg(test)]
pub(crate) mod test_support;

pub use alert::{AlertCoordinator, AlertRecord, CooldownTable, SideEffect, StoredAlert};
pub use capture::{open_device, probe_camera, CameraSettings, CaptureDevice, ProbeReport};
pub use config::ZonewatchConfig;
pub use detect::{BoundingBox, Detection, Detector, HttpDetector, StubDetector};
pub use error::{
    CameraError, ConfigError, DetectionError, NotificationError, PersistenceError, RecordError,
};
pub use frame::{Frame, FrameSlot, FrameSubscription};
pub use notify::{
    Notification, NotificationChannel, NotificationDispatcher, NotificationOutcome,
};
pub use pipeline::{DetectionLoop, DetectionPipeline, IntrusionEvent};
pub use recorder::IncidentRecorder;
pub use source::{CameraState, FrameSource, ReconnectPolicy, SourceHandle};
pub use status::{DetectionObservation, StatusBoard, SystemStatus};
pub use store::{AlertStats, AlertStore, InMemoryAlertStore, SqliteAlertStore};
pub use system::{Components, Surveillance};
pub use zone::{Point, Zone};
