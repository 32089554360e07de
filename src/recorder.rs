//! IncidentRecorder: writes a bounded window of frames to a clip file.
//!
//! Frames come from a lossy subscription, never from the device, so a slow
//! disk only makes the clip sparser. Clips are Motion-JPEG streams
//! (concatenated JPEG images). The clip is written to `<name>.part` and
//! renamed on success; a window that yielded no frames leaves nothing behind.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use crate::alert::to_epoch_ms;
use crate::error::RecordError;
use crate::frame::FrameSubscription;

pub const CLIP_EXTENSION: &str = "mjpeg";
const DEFAULT_JPEG_QUALITY: u8 = 80;
const FRAME_WAIT: Duration = Duration::from_millis(100);

#[derive(Clone, Debug)]
pub struct IncidentRecorder {
    clip_dir: PathBuf,
    jpeg_quality: u8,
    cancel: Arc<AtomicBool>,
}

/// Summary of a finished clip.
#[derive(Clone, Debug, PartialEq)]
pub struct Clip {
    pub path: PathBuf,
    pub frames: u64,
    pub bytes: u64,
}

impl IncidentRecorder {
    pub fn new(clip_dir: impl Into<PathBuf>) -> Self {
        Self {
            clip_dir: clip_dir.into(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    pub fn clip_dir(&self) -> &Path {
        &self.clip_dir
    }

    /// Cut every in-flight and future recording short.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Allow recordings again after `cancel`.
    pub fn resume(&self) {
        self.cancel.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Record `duration` worth of frames to `incident_<label>_<epoch_ms>.mjpeg`.
    ///
    /// The window ends early on `cancel` or when the frame slot is closed;
    /// whatever was written by then is kept.
    pub fn record_clip(
        &self,
        frames: &mut FrameSubscription,
        duration: Duration,
        label: &str,
    ) -> Result<Clip, RecordError> {
        fs::create_dir_all(&self.clip_dir).map_err(|source| RecordError::Io {
            path: self.clip_dir.clone(),
            source,
        })?;
        let (final_path, part_path, file) = self.create_part_file(label)?;

        let written = self.write_frames(frames, duration, file, &part_path);
        let written = match written {
            Ok(written) => written,
            Err(err) => {
                discard(&part_path);
                return Err(err);
            }
        };
        let (count, bytes) = (written.frames, written.bytes);

        if count == 0 {
            discard(&part_path);
            return Err(match written.encode_error {
                Some(detail) => RecordError::Encode(detail),
                None => RecordError::Empty(duration),
            });
        }

        fs::rename(&part_path, &final_path).map_err(|source| {
            discard(&part_path);
            RecordError::Io {
                path: final_path.clone(),
                source,
            }
        })?;
        log::info!(
            "clip saved: {} ({} frames, {} bytes)",
            final_path.display(),
            count,
            bytes
        );
        Ok(Clip {
            path: final_path,
            frames: count,
            bytes,
        })
    }

    fn create_part_file(&self, label: &str) -> Result<(PathBuf, PathBuf, File), RecordError> {
        let stem = format!("incident_{}_{}", slug(label), to_epoch_ms(SystemTime::now()));
        for attempt in 0..16u32 {
            let name = if attempt == 0 {
                stem.clone()
            } else {
                format!("{}_{}", stem, attempt)
            };
            let final_path = self.clip_dir.join(format!("{}.{}", name, CLIP_EXTENSION));
            let part_path = self.clip_dir.join(format!("{}.{}.part", name, CLIP_EXTENSION));
            if final_path.exists() {
                continue;
            }
            match OpenOptions::new().write(true).create_new(true).open(&part_path) {
                Ok(file) => return Ok((final_path, part_path, file)),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(source) => {
                    return Err(RecordError::Io {
                        path: part_path,
                        source,
                    })
                }
            }
        }
        Err(RecordError::Io {
            path: self.clip_dir.join(stem),
            source: io::Error::new(io::ErrorKind::AlreadyExists, "no free clip name"),
        })
    }

    fn write_frames(
        &self,
        frames: &mut FrameSubscription,
        duration: Duration,
        file: File,
        part_path: &Path,
    ) -> Result<Written, RecordError> {
        let io_err = |source: io::Error| RecordError::Io {
            path: part_path.to_path_buf(),
            source,
        };
        let mut out = BufWriter::new(file);
        let started = Instant::now();
        let mut written = Written::default();

        while !self.is_cancelled() {
            let elapsed = started.elapsed();
            if elapsed >= duration {
                break;
            }
            let wait = (duration - elapsed).min(FRAME_WAIT);
            let Some(frame) = frames.next_timeout(wait) else {
                if frames.is_closed() {
                    log::info!(
                        "frame source closed after {:?}; clip cut short",
                        started.elapsed()
                    );
                    break;
                }
                continue;
            };
            let jpeg = match frame.to_jpeg(self.jpeg_quality) {
                Ok(jpeg) => jpeg,
                Err(err) => {
                    log::warn!("clip frame {} skipped: {}", frame.seq(), err);
                    written.encode_error = Some(err.to_string());
                    continue;
                }
            };
            out.write_all(&jpeg).map_err(io_err)?;
            written.frames += 1;
            written.bytes += jpeg.len() as u64;
        }

        let file = out.into_inner().map_err(|e| io_err(e.into_error()))?;
        file.sync_all().map_err(io_err)?;
        Ok(written)
    }
}

#[derive(Default)]
struct Written {
    frames: u64,
    bytes: u64,
    /// Last frame encoding failure, if any.
    encode_error: Option<String>,
}

fn discard(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        if err.kind() != io::ErrorKind::NotFound {
            log::warn!("failed to remove partial clip {}: {}", path.display(), err);
        }
    }
}

/// File-name-safe form of a zone name: lowercase ASCII alphanumerics and `_`.
pub fn slug(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    let mut last_sep = true;
    for c in label.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_sep = false;
        } else if !last_sep {
            out.push('_');
            last_sep = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    if out.is_empty() {
        out.push_str("zone");
    }
    out
}
