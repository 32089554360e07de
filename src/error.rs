//! Failure taxonomy for the surveillance pipeline.
//!
//! Each stage owns one error type. A failure degrades that stage's output to an
//! empty/absent value; none of these errors is allowed to halt another stage.

use std::path::PathBuf;

use thiserror::Error;

/// Capture device could not be opened or read.
#[derive(Debug, Error)]
pub enum CameraError {
    #[error("camera source '{0}' is not supported by this build")]
    Unsupported(String),

    #[error("failed to open camera '{source_id}': {detail}")]
    Open { source_id: String, detail: String },

    #[error("failed to read frame from '{source_id}': {detail}")]
    Read { source_id: String, detail: String },

    #[error("camera '{source_id}' unavailable after {attempts} attempts")]
    Unavailable { source_id: String, attempts: u32 },

    #[error("camera is not open")]
    NotOpen,

    #[error("frame source is already running")]
    AlreadyRunning,
}

/// Detector invocation failed for a single tick.
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("detector backend '{backend}' failed: {detail}")]
    Backend { backend: String, detail: String },

    #[error("detector response could not be parsed: {0}")]
    Response(String),
}

/// Incident recording produced no usable clip.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("no frames captured within {0:?}; clip discarded")]
    Empty(std::time::Duration),

    #[error("clip i/o failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no frame of the clip could be encoded: {0}")]
    Encode(String),
}

/// A single notification channel failed to deliver.
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("{channel}: transport error: {detail}")]
    Transport { channel: String, detail: String },

    #[error("{channel}: rejected with status {status}: {body}")]
    Rejected {
        channel: String,
        status: u16,
        body: String,
    },

    #[error("{channel}: channel task panicked")]
    Panicked { channel: String },
}

/// Alert persistence failed. Durability loss is reported, never fatal.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("alert {0} not found")]
    NotFound(i64),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Static configuration rejected at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {detail}")]
    Parse { path: PathBuf, detail: String },

    #[error("{0}")]
    Invalid(String),
}
