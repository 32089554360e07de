//! HTTP cameras: multipart MJPEG streams or single-JPEG snapshot endpoints.
//!
//! Most IP cameras and ESP32-class boards expose one of the two. The content
//! type of the first response decides which mode is used.

use std::io::Read;
use std::time::{Duration, Instant};

use image::GenericImageView;

use super::{CameraSettings, CaptureDevice};
use crate::error::CameraError;
use crate::frame::Frame;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct MjpegHttpCamera {
    settings: CameraSettings,
    agent: ureq::Agent,
    stream: Option<HttpStream>,
    frame_count: u64,
    last_frame_at: Option<Instant>,
}

enum HttpStream {
    Multipart(MjpegReader),
    Snapshot,
}

impl MjpegHttpCamera {
    pub fn new(settings: CameraSettings) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout_read(settings.read_timeout())
            .build();
        Self {
            settings,
            agent,
            stream: None,
            frame_count: 0,
            last_frame_at: None,
        }
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

    fn fetch_snapshot(&self) -> Result<Vec<u8>, CameraError> {
        let response = self
            .agent
            .get(&self.settings.source)
            .call()
            .map_err(|e| self.read_error(e))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_JPEG_BYTES as u64)
            .read_to_end(&mut bytes)
            .map_err(|e| self.read_error(e))?;
        if bytes.is_empty() {
            return Err(self.read_error("empty jpeg snapshot"));
        }
        Ok(bytes)
    }

    fn next_stream_jpeg(&mut self) -> Result<Vec<u8>, CameraError> {
        let result = match self.stream.as_mut() {
            Some(HttpStream::Multipart(reader)) => reader.next_jpeg(),
            _ => return Err(CameraError::NotOpen),
        };
        result.map_err(|detail| self.read_error(detail))
    }
}

impl CaptureDevice for MjpegHttpCamera {
    fn open(&mut self) -> Result<(), CameraError> {
        self.stream = None;
        let response = self
            .agent
            .get(&self.settings.source)
            .call()
            .map_err(|e| self.open_error(e))?;
        let content_type = response.header("Content-Type").unwrap_or("").to_lowercase();
        if content_type.contains("multipart") {
            self.stream = Some(HttpStream::Multipart(MjpegReader::new(Box::new(
                response.into_reader(),
            ))));
            log::info!("camera {}: connected (mjpeg stream)", self.settings.source);
        } else {
            self.stream = Some(HttpStream::Snapshot);
            log::info!("camera {}: connected (jpeg snapshots)", self.settings.source);
        }
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        let min_interval = self.settings.frame_interval();
        let multipart = match &self.stream {
            None => return Err(CameraError::NotOpen),
            Some(HttpStream::Multipart(_)) => true,
            Some(HttpStream::Snapshot) => false,
        };
        loop {
            let jpeg = if multipart {
                self.next_stream_jpeg()?
            } else {
                if let Some(last) = self.last_frame_at {
                    let since = last.elapsed();
                    if since < min_interval {
                        std::thread::sleep(min_interval - since);
                    }
                }
                self.fetch_snapshot()?
            };

            // Multipart streams may run faster than requested; decimate.
            let now = Instant::now();
            if multipart {
                if let Some(last) = self.last_frame_at {
                    if now.duration_since(last) < min_interval {
                        continue;
                    }
                }
            }

            let (pixels, width, height) = decode_jpeg(&jpeg).map_err(|e| self.read_error(e))?;
            self.frame_count += 1;
            self.last_frame_at = Some(now);
            return Ok(Frame::new(self.frame_count, width, height, pixels));
        }
    }

    fn close(&mut self) {
        self.stream = None;
    }

    fn describe(&self) -> String {
        self.settings.source.clone()
    }
}

struct MjpegReader {
    reader: Box<dyn Read + Send>,
    buffer: Vec<u8>,
}

impl MjpegReader {
    fn new(reader: Box<dyn Read + Send>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    fn next_jpeg(&mut self) -> Result<Vec<u8>, String> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(frame);
            }

            let read = self
                .reader
                .read(&mut chunk)
                .map_err(|e| format!("read mjpeg chunk: {}", e))?;
            if read == 0 {
                return Err("mjpeg stream ended".to_string());
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let keep = 2.min(self.buffer.len());
                let drain_len = self.buffer.len() - keep;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

fn decode_jpeg(bytes: &[u8]) -> Result<(Vec<u8>, u32, u32), image::ImageError> {
    let image = image::load_from_memory(bytes)?;
    let (width, height) = image.dimensions();
    Ok((image.into_rgb8().into_raw(), width, height))
}

/// Byte range of the first complete JPEG (SOI..EOI) in `buffer`.
///
/// Marker segments are stepped over by their length field, so a thumbnail
/// embedded in an APP segment (EXIF) never ends the outer image early.
fn jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let mut from = 0;
    loop {
        let start = from + buffer[from..].windows(2).position(|w| w == [0xFF, 0xD8])?;
        match scan_jpeg(buffer, start + 2) {
            Scan::Complete(end) => return Some((start, end)),
            Scan::Incomplete => return None,
            // Truncated or garbled image: resync on the next SOI.
            Scan::Corrupt => from = start + 2,
        }
    }
}

enum Scan {
    Complete(usize),
    Incomplete,
    Corrupt,
}

/// Walk markers from just after SOI until EOI.
fn scan_jpeg(buf: &[u8], mut i: usize) -> Scan {
    let mut entropy_coded = false;
    loop {
        if entropy_coded {
            // Inside scan data only FF00 (stuffing), RSTn and fill bytes are payload.
            loop {
                let Some(&byte) = buf.get(i) else {
                    return Scan::Incomplete;
                };
                if byte != 0xFF {
                    i += 1;
                    continue;
                }
                let Some(&next) = buf.get(i + 1) else {
                    return Scan::Incomplete;
                };
                match next {
                    0xFF => i += 1,
                    0x00 | 0xD0..=0xD7 => i += 2,
                    _ => break,
                }
            }
            entropy_coded = false;
        }

        let Some(&prefix) = buf.get(i) else {
            return Scan::Incomplete;
        };
        if prefix != 0xFF {
            return Scan::Corrupt;
        }
        let Some(&marker) = buf.get(i + 1) else {
            return Scan::Incomplete;
        };
        match marker {
            0xFF => i += 1,
            0xD9 => return Scan::Complete(i + 2),
            0xD8 => return Scan::Corrupt,
            0x01 | 0xD0..=0xD7 => i += 2,
            _ => {
                let (Some(&hi), Some(&lo)) = (buf.get(i + 2), buf.get(i + 3)) else {
                    return Scan::Incomplete;
                };
                let len = u16::from_be_bytes([hi, lo]) as usize;
                if len < 2 {
                    return Scan::Corrupt;
                }
                i += 2 + len;
                entropy_coded = marker == 0xDA;
            }
        }
    }
}

/// Split a Motion-JPEG byte stream into its individual JPEG images.
pub fn split_jpeg_frames(mut bytes: &[u8]) -> Vec<&[u8]> {
    let mut frames = Vec::new();
    while let Some((start, end)) = jpeg_bounds(bytes) {
        frames.push(&bytes[start..end]);
        bytes = &bytes[end..];
    }
    frames
}
