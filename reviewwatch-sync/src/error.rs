//! Error types for reviewwatch-sync.

use thiserror::Error;

use reviewwatch_core::{CoreError, LabelError};

/// Errors that abort a sync cycle. Per-change query failures never do.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The change store could not be read or written.
    #[error("store error: {0}")]
    Store(#[from] CoreError),
}

/// Why a single remote request failed. Logged, then collapsed into a
/// coarse failure by the adapter.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Connection, TLS or timeout failure.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The configured endpoint is not a usable base URL.
    #[error("invalid endpoint '{endpoint}': {reason}")]
    Endpoint { endpoint: String, reason: String },

    /// Non-2xx response.
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    /// The body was not the expected JSON document.
    #[error("response decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// A label's vote structure was inconsistent.
    #[error(transparent)]
    Label(#[from] LabelError),
}

/// A live push to viewers could not be delivered.
#[derive(Debug, Error)]
#[error("live update delivery failed: {0}")]
pub struct DeliveryError(pub String);
