//! Error types for reviewwatch-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from store operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// I/O failure on the backing file, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization error (write path).
    #[error("store JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The backing file exists but does not hold a JSON object.
    #[error("failed to parse store at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Convenience constructor for [`CoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> CoreError {
    CoreError::Io {
        path: path.into(),
        source,
    }
}

/// Malformed label structure in a remote response.
#[derive(Debug, Error)]
pub enum LabelError {
    #[error("malformed label data: {reason}")]
    DataShape { reason: String },
}
