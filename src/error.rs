//! Error taxonomy for detection, media, batch, evaluation and pipeline stages.
//!
//! Per-frame and per-item failures are turned into data (`ErrorKind` + message)
//! by the video and batch layers. Only dataset and stage errors escape as hard
//! failures.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for library operations.
pub type DetectResult<T> = Result<T, DetectError>;

/// Stable, serializable error classification attached to failure records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InferenceError,
    MediaOpenError,
    MediaWriteError,
    DatasetError,
    TrainingError,
    StageError,
    ConfigError,
    Cancelled,
    IoError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InferenceError => "InferenceError",
            ErrorKind::MediaOpenError => "MediaOpenError",
            ErrorKind::MediaWriteError => "MediaWriteError",
            ErrorKind::DatasetError => "DatasetError",
            ErrorKind::TrainingError => "TrainingError",
            ErrorKind::StageError => "StageError",
            ErrorKind::ConfigError => "ConfigError",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::IoError => "IoError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("inference failed for {source_id}: {message}")]
    Inference { source_id: String, message: String },

    #[error("cannot open media {}: {message}", path.display())]
    MediaOpen { path: PathBuf, message: String },

    #[error("cannot write media {}: {message}", path.display())]
    MediaWrite { path: PathBuf, message: String },

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("training failed: {0}")]
    Training(String),

    #[error("stage {stage} failed: {message}")]
    Stage { stage: String, message: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DetectError {
    pub fn inference(source_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Inference {
            source_id: source_id.into(),
            message: message.into(),
        }
    }

    pub fn media_open(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Self::MediaOpen {
            path: path.as_ref().to_path_buf(),
            message: message.into(),
        }
    }

    pub fn media_write(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Self::MediaWrite {
            path: path.as_ref().to_path_buf(),
            message: message.into(),
        }
    }

    pub fn stage(stage: impl fmt::Display, message: impl Into<String>) -> Self {
        Self::Stage {
            stage: stage.to_string(),
            message: message.into(),
        }
    }

    /// Classification recorded alongside the human-readable message.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DetectError::Inference { .. } => ErrorKind::InferenceError,
            DetectError::MediaOpen { .. } => ErrorKind::MediaOpenError,
            DetectError::MediaWrite { .. } => ErrorKind::MediaWriteError,
            DetectError::Dataset(_) => ErrorKind::DatasetError,
            DetectError::Training(_) => ErrorKind::TrainingError,
            DetectError::Stage { .. } => ErrorKind::StageError,
            DetectError::InvalidConfig(_) => ErrorKind::ConfigError,
            DetectError::Cancelled => ErrorKind::Cancelled,
            DetectError::Io(_) => ErrorKind::IoError,
        }
    }
}
