//! Restricted zones and the point-in-polygon test.
//!
//! Zones are declared in normalized `[0,1]` frame coordinates so a single
//! configuration works at any capture resolution. Containment is evaluated
//! after scaling the polygon to the pixel dimensions of the frame under test.
//!
//! Boundary policy: a point lying on an edge or vertex counts as inside. The
//! policy lives here only; callers never special-case it.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const ZONE_NAME_PATTERN: &str = r"^[A-Za-z0-9 _-]{1,64}$";

/// Tolerance, in pixels, for treating a point as lying on a polygon edge.
const EDGE_EPSILON: f64 = 1e-6;

/// A 2D point. Normalized or pixel space depending on context.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "(f32, f32)", into = "(f32, f32)")]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

impl From<(f32, f32)> for Point {
    fn from((x, y): (f32, f32)) -> Self {
        Self { x, y }
    }
}

impl From<Point> for (f32, f32) {
    fn from(p: Point) -> Self {
        (p.x, p.y)
    }
}

/// Operator-defined restricted region. Immutable after startup.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ZoneSpec")]
pub struct Zone {
    name: String,
    polygon: Vec<Point>,
}

#[derive(Deserialize)]
struct ZoneSpec {
    name: String,
    #[serde(alias = "coords")]
    polygon: Vec<Point>,
}

impl TryFrom<ZoneSpec> for Zone {
    type Error = ConfigError;

    fn try_from(spec: ZoneSpec) -> Result<Self, Self::Error> {
        Zone::new(&spec.name, spec.polygon)
    }
}

impl Zone {
    /// Build a zone, rejecting degenerate or out-of-range polygons.
    pub fn new(name: &str, polygon: Vec<Point>) -> Result<Self, ConfigError> {
        validate_zone_name(name)?;
        if polygon.len() < 3 {
            return Err(ConfigError::Invalid(format!(
                "zone '{}' polygon needs at least 3 vertices, got {}",
                name,
                polygon.len()
            )));
        }
        for p in &polygon {
            if !(0.0..=1.0).contains(&p.x) || !(0.0..=1.0).contains(&p.y) {
                return Err(ConfigError::Invalid(format!(
                    "zone '{}' vertex ({}, {}) is outside normalized [0,1] space",
                    name, p.x, p.y
                )));
            }
        }
        Ok(Self {
            name: name.to_string(),
            polygon,
        })
    }

    /// Axis-aligned rectangle in normalized coordinates.
    pub fn rect(name: &str, x0: f32, y0: f32, x1: f32, y1: f32) -> Result<Self, ConfigError> {
        Self::new(
            name,
            vec![
                Point::new(x0, y0),
                Point::new(x1, y0),
                Point::new(x1, y1),
                Point::new(x0, y1),
            ],
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn polygon(&self) -> &[Point] {
        &self.polygon
    }

    /// Polygon scaled to pixel coordinates for a `width` x `height` frame.
    pub fn to_pixels(&self, width: u32, height: u32) -> Vec<(f64, f64)> {
        let (w, h) = (width as f64, height as f64);
        self.polygon
            .iter()
            .map(|p| (p.x as f64 * w, p.y as f64 * h))
            .collect()
    }

    /// Test a pixel-space point against this zone at the given frame size.
    pub fn contains_pixel(&self, point: (f64, f64), width: u32, height: u32) -> bool {
        contains(point, &self.to_pixels(width, height))
    }

    /// Area centroid in normalized coordinates (vertex mean for degenerate area).
    pub fn centroid(&self) -> Point {
        let n = self.polygon.len();
        let mut area2 = 0.0f64;
        let mut cx = 0.0f64;
        let mut cy = 0.0f64;
        for i in 0..n {
            let a = self.polygon[i];
            let b = self.polygon[(i + 1) % n];
            let cross = a.x as f64 * b.y as f64 - b.x as f64 * a.y as f64;
            area2 += cross;
            cx += (a.x as f64 + b.x as f64) * cross;
            cy += (a.y as f64 + b.y as f64) * cross;
        }
        if area2.abs() < f64::EPSILON {
            let sx: f64 = self.polygon.iter().map(|p| p.x as f64).sum();
            let sy: f64 = self.polygon.iter().map(|p| p.y as f64).sum();
            return Point::new((sx / n as f64) as f32, (sy / n as f64) as f32);
        }
        Point::new((cx / (3.0 * area2)) as f32, (cy / (3.0 * area2)) as f32)
    }
}

/// Zone names are shown in alerts and used in clip file names.
pub fn validate_zone_name(name: &str) -> Result<(), ConfigError> {
    static ZONE_NAME_RE: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    let re = ZONE_NAME_RE
        .get_or_init(|| Regex::new(ZONE_NAME_PATTERN))
        .as_ref()
        .map_err(|e| ConfigError::Invalid(format!("zone name pattern: {}", e)))?;
    if !re.is_match(name) || name.trim().is_empty() {
        return Err(ConfigError::Invalid(format!(
            "zone name '{}' must match {}",
            name, ZONE_NAME_PATTERN
        )));
    }
    Ok(())
}

/// Point-in-polygon test (even-odd ray casting) with inclusive boundary.
pub fn contains(point: (f64, f64), polygon: &[(f64, f64)]) -> bool {
    if polygon.len() < 3 {
        return false;
    }
    let (px, py) = point;
    let n = polygon.len();

    for i in 0..n {
        if on_segment(point, polygon[i], polygon[(i + 1) % n]) {
            return true;
        }
    }

    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = polygon[i];
        let (xj, yj) = polygon[j];
        if (yi > py) != (yj > py) {
            let x_cross = (xj - xi) * (py - yi) / (yj - yi) + xi;
            if px < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

fn on_segment(p: (f64, f64), a: (f64, f64), b: (f64, f64)) -> bool {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let cross = dx * (p.1 - a.1) - dy * (p.0 - a.0);
    let len = dx.hypot(dy).max(1.0);
    if cross.abs() > EDGE_EPSILON * len {
        return false;
    }
    p.0 >= a.0.min(b.0) - EDGE_EPSILON
        && p.0 <= a.0.max(b.0) + EDGE_EPSILON
        && p.1 >= a.1.min(b.1) - EDGE_EPSILON
        && p.1 <= a.1.max(b.1) + EDGE_EPSILON
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<(f64, f64)> {
        vec![(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)]
    }

    #[test]
    fn interior_and_exterior_points() {
        assert!(contains((5.0, 5.0), &square()));
        assert!(!contains((15.0, 5.0), &square()));
        assert!(!contains((-1.0, -1.0), &square()));
    }

    #[test]
    fn boundary_points_count_as_inside() {
        let poly = square();
        for p in [(0.0, 5.0), (10.0, 5.0), (5.0, 0.0), (5.0, 10.0), (0.0, 0.0), (10.0, 10.0)] {
            assert!(contains(p, &poly), "{:?} on boundary should be inside", p);
            // Repeated calls agree.
            assert_eq!(contains(p, &poly), contains(p, &poly));
        }
    }

    #[test]
    fn concave_polygon_notch_is_outside() {
        // U shape opening upwards.
        let poly = vec![
            (0.0, 0.0),
            (3.0, 0.0),
            (3.0, 3.0),
            (2.0, 3.0),
            (2.0, 1.0),
            (1.0, 1.0),
            (1.0, 3.0),
            (0.0, 3.0),
        ];
        assert!(!contains((1.5, 2.0), &poly));
        assert!(contains((0.5, 2.0), &poly));
        assert!(contains((2.5, 2.0), &poly));
    }

    #[test]
    fn zone_scales_to_frame_dimensions() {
        let zone = Zone::rect("Office Area", 0.3, 0.3, 0.7, 0.7).unwrap();
        assert!(zone.contains_pixel((320.0, 240.0), 640, 480));
        assert!(!zone.contains_pixel((100.0, 100.0), 640, 480));
        // Same normalized location at another resolution.
        assert!(zone.contains_pixel((960.0, 540.0), 1920, 1080));
    }

    #[test]
    fn centroid_is_inside_zone() {
        let zone = Zone::new(
            "Loading Bay",
            vec![
                Point::new(0.2, 0.1),
                Point::new(0.9, 0.3),
                Point::new(0.6, 0.9),
                Point::new(0.1, 0.6),
            ],
        )
        .unwrap();
        let c = zone.centroid();
        for (w, h) in [(640, 480), (1280, 720), (33, 17)] {
            let p = (c.x as f64 * w as f64, c.y as f64 * h as f64);
            assert!(zone.contains_pixel(p, w, h));
        }
    }

    #[test]
    fn far_outside_points_are_outside() {
        let zone = Zone::rect("Main Entrance", 0.0, 0.0, 1.0, 1.0).unwrap();
        assert!(!zone.contains_pixel((-5000.0, -5000.0), 640, 480));
        assert!(!zone.contains_pixel((1e7, 1e7), 640, 480));
    }

    #[test]
    fn rejects_degenerate_polygons() {
        let err = Zone::new("Gate", vec![Point::new(0.0, 0.0), Point::new(1.0, 1.0)]);
        assert!(err.is_err());
        let err = Zone::new(
            "Gate",
            vec![Point::new(0.0, 0.0), Point::new(1.5, 0.0), Point::new(0.0, 1.0)],
        );
        assert!(err.is_err());
    }

    #[test]
    fn rejects_bad_names() {
        assert!(validate_zone_name("Main Entrance").is_ok());
        assert!(validate_zone_name("lot_a-1").is_ok());
        assert!(validate_zone_name("").is_err());
        assert!(validate_zone_name("   ").is_err());
        assert!(validate_zone_name("../etc/passwd").is_err());
    }

    #[test]
    fn deserializes_from_coords_alias() {
        let zone: Zone = serde_json::from_str(
            r#"{"name": "Main Entrance", "coords": [[0.1, 0.1], [0.9, 0.1], [0.9, 0.9], [0.1, 0.9]]}"#,
        )
        .unwrap();
        assert_eq!(zone.name(), "Main Entrance");
        assert_eq!(zone.polygon().len(), 4);

        let bad: Result<Zone, _> =
            serde_json::from_str(r#"{"name": "Bad", "polygon": [[0.1, 0.1], [0.9, 0.1]]}"#);
        assert!(bad.is_err());
    }
}
