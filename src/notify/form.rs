//! `multipart/form-data` request bodies for ureq, which only sends raw bytes.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static BOUNDARY_SEQ: AtomicU64 = AtomicU64::new(0);

pub(crate) struct MultipartForm {
    boundary: String,
    body: Vec<u8>,
}

impl MultipartForm {
    pub(crate) fn new() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let seq = BOUNDARY_SEQ.fetch_add(1, Ordering::Relaxed);
        Self {
            boundary: format!("zonewatch-{:x}-{:x}", nanos, seq),
            body: Vec::new(),
        }
    }

    pub(crate) fn text(mut self, name: &str, value: &str) -> Self {
        self.open_part(&format!("Content-Disposition: form-data; name=\"{}\"", name));
        self.body.extend_from_slice(value.as_bytes());
        self.body.extend_from_slice(b"\r\n");
        self
    }

    pub(crate) fn file(
        mut self,
        name: &str,
        file_name: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> Self {
        let file_name = file_name.replace(['"', '\r', '\n'], "_");
        self.open_part(&format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}",
            name, file_name, content_type
        ));
        self.body.extend_from_slice(bytes);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    fn open_part(&mut self, headers: &str) {
        self.body
            .extend_from_slice(format!("--{}\r\n{}\r\n\r\n", self.boundary, headers).as_bytes());
    }

    /// Content-Type header value and the finished body.
    pub(crate) fn finish(mut self) -> (String, Vec<u8>) {
        self.body
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        (
            format!("multipart/form-data; boundary={}", self.boundary),
            self.body,
        )
    }
}

/// Clip bytes to upload, or `None` (logged) when the file is missing,
/// unreadable or larger than `max_bytes`.
pub(crate) fn read_attachment(channel: &str, path: &Path, max_bytes: u64) -> Option<Vec<u8>> {
    let size = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(err) => {
            log::warn!("notify {}: clip {} not readable: {}", channel, path.display(), err);
            return None;
        }
    };
    if size > max_bytes {
        log::warn!(
            "notify {}: clip {} is {} bytes, over the {} byte upload limit",
            channel,
            path.display(),
            size,
            max_bytes
        );
        return None;
    }
    match fs::read(path) {
        Ok(bytes) => Some(bytes),
        Err(err) => {
            log::warn!("notify {}: clip {} not readable: {}", channel, path.display(), err);
            None
        }
    }
}

/// File name shown to the recipient.
pub(crate) fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "incident.mjpeg".to_string())
}
