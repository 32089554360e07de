//! RTSP cameras via GStreamer.
//!
//! Pipeline: `rtspsrc ! decodebin ! videoconvert ! appsink` with RGB caps.
//! The appsink keeps at most one buffer and drops the rest, so a slow
//! consumer never builds a backlog inside GStreamer either.

use std::time::Instant;

use gstreamer::prelude::*;

use super::{CameraSettings, CaptureDevice};
use crate::error::CameraError;
use crate::frame::Frame;

pub struct RtspCamera {
    settings: CameraSettings,
    pipeline: Option<(gstreamer::Pipeline, gstreamer_app::AppSink)>,
    frame_count: u64,
    last_frame_at: Option<Instant>,
}

impl RtspCamera {
    pub fn new(settings: CameraSettings) -> Result<Self, CameraError> {
        gstreamer::init().map_err(|e| CameraError::Open {
            source_id: settings.source.clone(),
            detail: format!("initialize gstreamer: {}", e),
        })?;
        Ok(Self {
            settings,
            pipeline: None,
            frame_count: 0,
            last_frame_at: None,
        })
    }

    fn open_error(&self, detail: impl ToString) -> CameraError {
        CameraError::Open {
            source_id: self.settings.source.clone(),
            detail: detail.to_string(),
        }
    }

    fn read_error(&self, detail: impl ToString) -> CameraError {
        CameraError::Read {
            source_id: self.settings.source.clone(),
            detail: detail.to_string(),
        }
    }

    fn build_pipeline(&self) -> Result<(gstreamer::Pipeline, gstreamer_app::AppSink), CameraError> {
        let description = format!(
            "rtspsrc location={} latency=0 ! decodebin ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            self.settings.source
        );
        let pipeline = gstreamer::parse::launch(&description)
            .map_err(|e| self.open_error(format!("build pipeline: {}", e)))?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| self.open_error("pipeline element is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .ok_or_else(|| self.open_error("appsink element missing from pipeline"))?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| self.open_error("appsink element has unexpected type"))?;

        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .build();
        appsink.set_caps(Some(&caps));
        appsink.set_max_buffers(1);
        appsink.set_drop(true);
        appsink.set_sync(false);
        Ok((pipeline, appsink))
    }

    fn bus_error(&self, pipeline: &gstreamer::Pipeline) -> Option<String> {
        let bus = pipeline.bus()?;
        while let Some(message) = bus.timed_pop(gstreamer::ClockTime::ZERO) {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    return Some(format!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    ));
                }
                MessageView::Eos(..) => return Some("stream reached EOS".to_string()),
                _ => {}
            }
        }
        None
    }
}

impl CaptureDevice for RtspCamera {
    fn open(&mut self) -> Result<(), CameraError> {
        self.close();
        let (pipeline, appsink) = self.build_pipeline()?;
        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| self.open_error(format!("set pipeline to Playing: {}", e)))?;
        self.pipeline = Some((pipeline, appsink));
        log::info!("camera {}: connected (rtsp)", self.settings.source);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        let (pipeline, appsink) = self.pipeline.as_ref().ok_or(CameraError::NotOpen)?;
        if let Some(detail) = self.bus_error(pipeline) {
            return Err(self.read_error(detail));
        }

        let timeout_ms = self.settings.read_timeout().as_millis() as u64;
        let sample = appsink
            .try_pull_sample(gstreamer::ClockTime::from_mseconds(timeout_ms))
            .ok_or_else(|| self.read_error("stream stalled"))?;
        let (pixels, width, height) = sample_to_pixels(&sample).map_err(|e| self.read_error(e))?;

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        Ok(Frame::new(self.frame_count, width, height, pixels))
    }

    fn close(&mut self) {
        if let Some((pipeline, _)) = self.pipeline.take() {
            if let Err(err) = pipeline.set_state(gstreamer::State::Null) {
                log::warn!("camera {}: failed to stop pipeline: {}", self.settings.source, err);
            }
        }
    }

    fn describe(&self) -> String {
        self.settings.source.clone()
    }
}

impl Drop for RtspCamera {
    fn drop(&mut self) {
        self.close();
    }
}

fn sample_to_pixels(sample: &gstreamer::Sample) -> Result<(Vec<u8>, u32, u32), String> {
    let buffer = sample.buffer().ok_or("sample missing buffer")?;
    let caps = sample.caps().ok_or("sample missing caps")?;
    let info = gstreamer_video::VideoInfo::from_caps(caps)
        .map_err(|e| format!("parse caps as video info: {}", e))?;

    let width = info.width();
    let height = info.height();
    let row_bytes = width as usize * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer
        .map_readable()
        .map_err(|e| format!("map buffer: {}", e))?;
    let data = map.as_slice();

    if stride == row_bytes {
        return Ok((data.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(data.get(start..end).ok_or("buffer row is out of bounds")?);
    }
    Ok((pixels, width, height))
}
