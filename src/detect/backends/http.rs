use std::time::Duration;

use serde::Deserialize;

use crate::detect::backend::Detector;
use crate::detect::result::Detection;
use crate::error::DetectionError;
use crate::frame::Frame;

const JPEG_QUALITY: u8 = 85;

/// Remote inference service.
///
/// POSTs the frame as `image/jpeg` and expects either a JSON array of
/// detections or an object with a `detections` array. Boxes are pixel
/// coordinates of the posted frame.
pub struct HttpDetector {
    url: String,
    agent: ureq::Agent,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum InferenceResponse {
    Bare(Vec<Detection>),
    Wrapped { detections: Vec<Detection> },
}

impl HttpDetector {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            url: url.into(),
            agent,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn backend_error(&self, detail: impl ToString) -> DetectionError {
        DetectionError::Backend {
            backend: self.url.clone(),
            detail: detail.to_string(),
        }
    }
}

impl Detector for HttpDetector {
    fn name(&self) -> &str {
        "http"
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
        let jpeg = frame
            .to_jpeg(JPEG_QUALITY)
            .map_err(|e| DetectionError::MalformedFrame(e.to_string()))?;

        let response = match self
            .agent
            .post(&self.url)
            .set("Content-Type", "image/jpeg")
            .set("X-Frame-Width", &frame.width().to_string())
            .set("X-Frame-Height", &frame.height().to_string())
            .send_bytes(&jpeg)
        {
            Ok(response) => response,
            Err(ureq::Error::Status(code, response)) => {
                let body = response.into_string().unwrap_or_default();
                return Err(self.backend_error(format!("status {}: {}", code, body.trim())));
            }
            Err(err) => return Err(self.backend_error(err)),
        };

        let body = response
            .into_string()
            .map_err(|e| self.backend_error(format!("read response: {}", e)))?;
        let parsed: InferenceResponse =
            serde_json::from_str(&body).map_err(|e| DetectionError::Response(e.to_string()))?;
        Ok(match parsed {
            InferenceResponse::Bare(detections) => detections,
            InferenceResponse::Wrapped { detections } => detections,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::serve_once;

    fn detector_at(base: String) -> HttpDetector {
        HttpDetector::new(format!("{}/detect", base), Duration::from_secs(5))
    }

    #[test]
    fn parses_bare_detection_list() {
        let (url, server) = serve_once(
            "200 OK",
            r#"[{"bbox": [10, 10, 50, 90], "confidence": 0.8, "class_name": "person"}]"#,
        );
        let mut detector = detector_at(url);
        let detections = detector.detect(&Frame::filled(1, 16, 16, [1, 2, 3])).unwrap();
        assert_eq!(detections.len(), 1);
        assert!(detections[0].is_person());

        let posted = server.join().unwrap();
        assert!(posted.request_line.starts_with("POST /detect"));
        assert_eq!(&posted.body[..2], &[0xFF, 0xD8], "frame should be posted as JPEG");
    }

    #[test]
    fn parses_wrapped_detection_list() {
        let (url, server) = serve_once("200 OK", r#"{"detections": []}"#);
        let mut detector = detector_at(url);
        assert!(detector
            .detect(&Frame::filled(1, 8, 8, [0, 0, 0]))
            .unwrap()
            .is_empty());
        server.join().unwrap();
    }

    #[test]
    fn http_errors_are_backend_failures() {
        let (url, server) = serve_once("500 Internal Server Error", r#"{"error": "model not loaded"}"#);
        let mut detector = detector_at(url);
        let err = detector.detect(&Frame::filled(1, 8, 8, [0, 0, 0])).unwrap_err();
        assert!(matches!(err, DetectionError::Backend { .. }));
        server.join().unwrap();
    }

    #[test]
    fn garbage_response_is_a_response_error() {
        let (url, server) = serve_once("200 OK", "not json");
        let mut detector = detector_at(url);
        let err = detector.detect(&Frame::filled(1, 8, 8, [0, 0, 0])).unwrap_err();
        assert!(matches!(err, DetectionError::Response(_)));
        server.join().unwrap();
    }
}
