//! Local V4L2 cameras (`/dev/videoN` or a bare index).

use std::time::Instant;

use ouroboros::self_referencing;

use super::{CameraSettings, CaptureDevice};
use crate::error::CameraError;
use crate::frame::{Frame, RGB_CHANNELS};

const BUFFER_COUNT: u32 = 4;

pub struct V4l2Camera {
    settings: CameraSettings,
    path: String,
    state: Option<DeviceState>,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    active_width: u32,
    active_height: u32,
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Camera {
    pub fn new(settings: CameraSettings) -> Self {
        let path = device_path(&settings.source);
        Self {
            active_width: settings.width,
            active_height: settings.height,
            settings,
            path,
            state: None,
            frame_count: 0,
            last_frame_at: None,
        }
    }

    fn open_error(&self, detail: impl ToString) -> CameraError {
        CameraError::Open {
            source_id: self.path.clone(),
            detail: detail.to_string(),
        }
    }
}

/// `"0"` -> `/dev/video0`; paths pass through.
fn device_path(source: &str) -> String {
    let trimmed = source.trim();
    match trimmed.parse::<u32>() {
        Ok(index) => format!("/dev/video{}", index),
        Err(_) => trimmed.to_string(),
    }
}

impl CaptureDevice for V4l2Camera {
    fn open(&mut self) -> Result<(), CameraError> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        self.close();
        let device = v4l::Device::with_path(&self.path).map_err(|e| self.open_error(e))?;
        let mut format = device
            .format()
            .map_err(|e| self.open_error(format!("read format: {}", e)))?;
        format.width = self.settings.width;
        format.height = self.settings.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("camera {}: failed to set format: {}", self.path, err);
                device
                    .format()
                    .map_err(|e| self.open_error(format!("read format after set failure: {}", e)))?
            }
        };
        if format.fourcc != v4l::FourCC::new(b"RGB3") {
            return Err(self.open_error(format!("device does not offer RGB3 (got {})", format.fourcc)));
        }

        if self.settings.fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.settings.fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("camera {}: failed to set fps: {}", self.path, err);
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;

        let state = DeviceStateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, BUFFER_COUNT)
            },
        }
        .try_build()
        .map_err(|e| self.open_error(format!("create buffer stream: {}", e)))?;
        self.state = Some(state);

        log::info!(
            "camera {}: connected ({}x{})",
            self.path,
            self.active_width,
            self.active_height
        );
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().ok_or(CameraError::NotOpen)?;
        let pixels = state
            .with_mut(|fields| fields.stream.next().map(|(buf, _meta)| buf.to_vec()))
            .map_err(|e| CameraError::Read {
                source_id: self.path.clone(),
                detail: e.to_string(),
            })?;

        let expected = self.active_width as usize * self.active_height as usize * RGB_CHANNELS;
        if pixels.len() < expected {
            return Err(CameraError::Read {
                source_id: self.path.clone(),
                detail: format!("short frame: {} of {} bytes", pixels.len(), expected),
            });
        }

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        let mut pixels = pixels;
        pixels.truncate(expected);
        Ok(Frame::new(
            self.frame_count,
            self.active_width,
            self.active_height,
            pixels,
        ))
    }

    fn close(&mut self) {
        self.state = None;
    }

    fn describe(&self) -> String {
        self.path.clone()
    }
}
