mod backend;
mod backends;
mod result;

use std::time::Duration;

pub use backend::Detector;
pub use backends::{HttpDetector, StubDetector};
pub use result::{BoundingBox, Detection};

/// Pick the detector backend: remote inference when a URL is configured,
/// otherwise the stub.
pub fn detector_for(url: Option<&str>, timeout: Duration) -> Box<dyn Detector> {
    match url {
        Some(url) if !url.trim().is_empty() => {
            log::info!("detector: http backend at {}", url);
            Box::new(HttpDetector::new(url.trim(), timeout))
        }
        _ => {
            log::warn!("detector: no inference endpoint configured; using stub (no detections)");
            Box::new(StubDetector::new())
        }
    }
}
