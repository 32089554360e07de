use crate::detect::backend::Detector;
use crate::detect::result::Detection;
use crate::error::DetectionError;
use crate::frame::Frame;

/// Detector without a model. Returns the configured detections for every
/// frame (none by default), so the daemon can run without inference.
#[derive(Clone, Debug, Default)]
pub struct StubDetector {
    detections: Vec<Detection>,
}

impl StubDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_detections(detections: Vec<Detection>) -> Self {
        Self { detections }
    }
}

impl Detector for StubDetector {
    fn name(&self) -> &str {
        "stub"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectionError> {
        if !frame.is_well_formed() {
            return Err(DetectionError::MalformedFrame(format!(
                "{}x{} frame with {} bytes",
                frame.width(),
                frame.height(),
                frame.pixels().len()
            )));
        }
        Ok(self.detections.clone())
    }
}
