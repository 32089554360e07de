//! Synthetic camera (`stub://`).
//!
//! Renders a static background with a dark block walking across the frame,
//! paced at the configured frame rate. Lets the daemon run end to end on a
//! machine without a camera.

use std::thread;
use std::time::Instant;

use super::{CameraSettings, CaptureDevice};
use crate::error::CameraError;
use crate::frame::{Frame, RGB_CHANNELS};

const BACKGROUND: [u8; 3] = [96, 104, 112];
const FIGURE: [u8; 3] = [24, 24, 32];

pub struct SyntheticCamera {
    settings: CameraSettings,
    opened: bool,
    frame_count: u64,
    last_frame_at: Option<Instant>,
}

impl SyntheticCamera {
    pub fn new(settings: CameraSettings) -> Self {
        Self {
            settings,
            opened: false,
            frame_count: 0,
            last_frame_at: None,
        }
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    fn render(&self) -> Vec<u8> {
        let w = self.settings.width as usize;
        let h = self.settings.height as usize;
        let mut pixels = Vec::with_capacity(w * h * RGB_CHANNELS);
        for _ in 0..w * h {
            pixels.extend_from_slice(&BACKGROUND);
        }

        // Figure roughly person-shaped: 1/8 of the width, 1/2 of the height.
        let fig_w = (w / 8).max(1);
        let fig_h = (h / 2).max(1);
        let travel = w.saturating_sub(fig_w).max(1);
        let x0 = (self.frame_count as usize * 4) % travel;
        let y0 = (h - fig_h) / 2;
        for y in y0..(y0 + fig_h).min(h) {
            for x in x0..(x0 + fig_w).min(w) {
                let offset = (y * w + x) * RGB_CHANNELS;
                pixels[offset..offset + RGB_CHANNELS].copy_from_slice(&FIGURE);
            }
        }
        pixels
    }
}

impl CaptureDevice for SyntheticCamera {
    fn open(&mut self) -> Result<(), CameraError> {
        self.opened = true;
        self.last_frame_at = None;
        log::info!("camera {}: connected (synthetic)", self.settings.source);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        if !self.opened {
            return Err(CameraError::NotOpen);
        }
        if let Some(last) = self.last_frame_at {
            let interval = self.settings.frame_interval();
            let since = last.elapsed();
            if since < interval {
                thread::sleep(interval - since);
            }
        }
        self.last_frame_at = Some(Instant::now());
        self.frame_count += 1;
        Ok(Frame::new(
            self.frame_count,
            self.settings.width,
            self.settings.height,
            self.render(),
        ))
    }

    fn close(&mut self) {
        self.opened = false;
    }

    fn describe(&self) -> String {
        self.settings.source.clone()
    }
}
