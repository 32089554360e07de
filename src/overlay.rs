//! Live-view annotation.
//!
//! Draws zone outlines and person boxes onto a copy of the frame. The source
//! frame is never touched; callers get a new `Frame` with the same sequence
//! number and capture time.

use crate::detect::Detection;
use crate::frame::{Frame, RGB_CHANNELS};
use crate::zone::Zone;

const ZONE_COLOR: [u8; 3] = [255, 255, 0];
const PERSON_COLOR: [u8; 3] = [0, 255, 0];
const OTHER_COLOR: [u8; 3] = [0, 0, 255];
const THICKNESS: i64 = 2;

struct Canvas {
    pixels: Vec<u8>,
    width: i64,
    height: i64,
}

impl Canvas {
    fn put(&mut self, x: i64, y: i64, rgb: [u8; 3]) {
        if x < 0 || y < 0 || x >= self.width || y >= self.height {
            return;
        }
        let offset = (y as usize * self.width as usize + x as usize) * RGB_CHANNELS;
        if let Some(px) = self.pixels.get_mut(offset..offset + RGB_CHANNELS) {
            px.copy_from_slice(&rgb);
        }
    }

    fn dot(&mut self, x: i64, y: i64, rgb: [u8; 3]) {
        for dy in 0..THICKNESS {
            for dx in 0..THICKNESS {
                self.put(x + dx, y + dy, rgb);
            }
        }
    }

    /// Bresenham line, clipped per pixel.
    fn line(&mut self, (x0, y0): (i64, i64), (x1, y1): (i64, i64), rgb: [u8; 3]) {
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;
        let (mut x, mut y) = (x0, y0);
        loop {
            self.dot(x, y, rgb);
            if x == x1 && y == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }

    fn polygon(&mut self, points: &[(i64, i64)], rgb: [u8; 3]) {
        let n = points.len();
        for i in 0..n {
            self.line(points[i], points[(i + 1) % n], rgb);
        }
    }
}

fn clamp_coord(v: f64, max: i64) -> i64 {
    (v.round() as i64).clamp(-1, max)
}

/// New frame with zones outlined and detection boxes drawn.
pub fn annotate(frame: &Frame, zones: &[Zone], detections: &[Detection]) -> Frame {
    if !frame.is_well_formed() {
        return frame.clone();
    }
    let mut canvas = Canvas {
        pixels: frame.pixels().to_vec(),
        width: frame.width() as i64,
        height: frame.height() as i64,
    };

    for zone in zones {
        let points: Vec<(i64, i64)> = zone
            .to_pixels(frame.width(), frame.height())
            .into_iter()
            .map(|(x, y)| (clamp_coord(x, canvas.width), clamp_coord(y, canvas.height)))
            .collect();
        canvas.polygon(&points, ZONE_COLOR);
    }

    for det in detections {
        let color = if det.is_person() {
            PERSON_COLOR
        } else {
            OTHER_COLOR
        };
        let b = det.bbox;
        let (x1, y1) = (
            clamp_coord(b.x1 as f64, canvas.width),
            clamp_coord(b.y1 as f64, canvas.height),
        );
        let (x2, y2) = (
            clamp_coord(b.x2 as f64, canvas.width),
            clamp_coord(b.y2 as f64, canvas.height),
        );
        canvas.polygon(&[(x1, y1), (x2, y1), (x2, y2), (x1, y2)], color);
    }

    frame.with_pixels(canvas.pixels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    fn pixel(frame: &Frame, x: u32, y: u32) -> [u8; 3] {
        let offset = ((y * frame.width() + x) as usize) * RGB_CHANNELS;
        let p = &frame.pixels()[offset..offset + 3];
        [p[0], p[1], p[2]]
    }

    #[test]
    fn annotation_returns_new_frame_and_leaves_source_intact() {
        let frame = Frame::filled(9, 100, 100, [0, 0, 0]);
        let zone = Zone::rect("Office Area", 0.3, 0.3, 0.7, 0.7).unwrap();
        let det = Detection::new(BoundingBox::new(10.0, 10.0, 20.0, 40.0), 0.9, "person");

        let annotated = annotate(&frame, &[zone], &[det]);
        assert_eq!(annotated.seq(), 9);
        assert_eq!(annotated.captured_at(), frame.captured_at());
        assert!(frame.pixels().iter().all(|&b| b == 0));

        assert_eq!(pixel(&annotated, 30, 30), ZONE_COLOR);
        assert_eq!(pixel(&annotated, 50, 30), ZONE_COLOR);
        assert_eq!(pixel(&annotated, 10, 25), PERSON_COLOR);
        assert_eq!(pixel(&annotated, 50, 50), [0, 0, 0]);
    }

    #[test]
    fn boxes_outside_the_frame_are_clipped() {
        let frame = Frame::filled(1, 20, 20, [0, 0, 0]);
        let det = Detection::new(BoundingBox::new(-50.0, -50.0, 500.0, 500.0), 0.9, "person");
        let annotated = annotate(&frame, &[], &[det]);
        assert_eq!(annotated.pixels().len(), frame.pixels().len());
    }
}
