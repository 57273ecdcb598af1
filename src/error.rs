use std::path::PathBuf;

use thiserror::Error;

/// Failures that abort a pipeline run.
///
/// Every stage validates its own inputs and returns one of these; nothing is
/// retried and no partial results are salvaged.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Missing data: {0}")]
    MissingData(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("I/O error at `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Unable to encode volume: {0}")]
    VolumeEncode(#[from] bincode::error::EncodeError),

    #[error("Unable to decode volume: {0}")]
    VolumeDecode(#[from] bincode::error::DecodeError),

    #[error("Checkpoint error at `{path}`: {message}")]
    Checkpoint { path: PathBuf, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Batch prefetch worker stopped unexpectedly")]
    PrefetchStopped,
}

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn checkpoint(path: impl Into<PathBuf>, source: burn::record::RecorderError) -> Self {
        Self::Checkpoint {
            path: path.into(),
            message: format!("{source:?}"),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn missing(message: impl Into<String>) -> Self {
        Self::MissingData(message.into())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
