use crate::error::DetectionError;
use crate::frame::Frame;

use super::result::Detection;

/// Object detector capability.
///
/// The model is a black box: given a frame, return every object it sees with
/// pixel-space boxes. Filtering (class, confidence, zones) happens in the
/// pipeline, not here.
pub trait Detector: Send {
    /// Backend identifier for logs.
    fn name(&self) -> &str;

    /// Run detection on one frame. Failures are per call; the next call starts fresh.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectionError>;
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectionError> {
        (**self).detect(frame)
    }
}
