use std::path::PathBuf;

use thiserror::Error;

use crate::contract::UploadError;

/// Errors reading a request from, or writing a response to, the standard streams.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid JSON request: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid JSON response: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to read request: {0}")]
    Read(#[source] std::io::Error),

    #[error("failed to write response: {0}")]
    Write(#[source] std::io::Error),
}

/// Errors walking the scan root.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("cannot read directory {}: {source}", path.display())]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot walk {}: {source}", root.display())]
    Walk {
        root: PathBuf,
        #[source]
        source: ignore::Error,
    },

    #[error("cannot read metadata of {}: {source}", path.display())]
    Metadata {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that abort an `out` invocation.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error("failed to construct storage client: {0}")]
    Connect(#[source] UploadError),

    #[error("failed to upload {} to {key}: {source}", path.display())]
    Upload {
        path: PathBuf,
        key: String,
        #[source]
        source: UploadError,
    },

    #[error("upload of {} to {key} did not finish within {seconds}s", path.display())]
    Timeout {
        path: PathBuf,
        key: String,
        seconds: u64,
    },
}
