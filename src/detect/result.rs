use serde::{Deserialize, Serialize};

/// Axis-aligned box in pixel coordinates of the frame it was detected on.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    /// Corners may be given in any order; they are normalized to top-left/bottom-right.
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    /// Box of `w` x `h` centred on `(cx, cy)`.
    pub fn centered(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0)
    }

    /// Reference point used for zone membership.
    pub fn center(&self) -> (f64, f64) {
        (
            (self.x1 as f64 + self.x2 as f64) / 2.0,
            (self.y1 as f64 + self.y2 as f64) / 2.0,
        )
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }
}

impl From<[f32; 4]> for BoundingBox {
    fn from([x1, y1, x2, y2]: [f32; 4]) -> Self {
        Self::new(x1, y1, x2, y2)
    }
}

impl From<BoundingBox> for [f32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// One object reported by the detector for one frame. Not persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f32,
    #[serde(alias = "class", alias = "label")]
    pub class_name: String,
}

impl Detection {
    pub fn new(bbox: BoundingBox, confidence: f32, class_name: impl Into<String>) -> Self {
        Self {
            bbox,
            confidence,
            class_name: class_name.into(),
        }
    }

    /// Person detection centred on `(cx, cy)` with a plausible upright box.
    pub fn person_at(cx: f32, cy: f32, confidence: f32) -> Self {
        Self::new(BoundingBox::centered(cx, cy, 40.0, 100.0), confidence, "person")
    }

    pub fn is_person(&self) -> bool {
        self.class_name.eq_ignore_ascii_case("person")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn center_is_midpoint_not_corner() {
        let b = BoundingBox::new(100.0, 50.0, 200.0, 250.0);
        assert_eq!(b.center(), (150.0, 150.0));
    }

    #[test]
    fn corners_are_normalized() {
        let b = BoundingBox::new(200.0, 250.0, 100.0, 50.0);
        assert_eq!((b.x1, b.y1, b.x2, b.y2), (100.0, 50.0, 200.0, 250.0));
        assert_eq!(b.width(), 100.0);
        assert_eq!(b.height(), 200.0);
    }

    #[test]
    fn parses_detector_json() {
        let d: Detection = serde_json::from_str(
            r#"{"bbox": [10, 20, 30, 60], "confidence": 0.91, "class_name": "Person"}"#,
        )
        .unwrap();
        assert!(d.is_person());
        assert_eq!(d.bbox.center(), (20.0, 40.0));

        let d: Detection =
            serde_json::from_str(r#"{"bbox": [0, 0, 1, 1], "confidence": 0.4, "label": "dog"}"#)
                .unwrap();
        assert!(!d.is_person());
    }
}
