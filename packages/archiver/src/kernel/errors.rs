//! Typed errors for the infrastructure adapters.
//!
//! Adapters return these so callers can tell an external-service failure
//! from a storage failure. Domain code wraps them in `anyhow` with context.

use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failures from the rendering service. All of them are fatal to the job.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Transport failure, including timeouts
    #[error("rendering request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx response from the service
    #[error("rendering service error: {status} - {body}")]
    Status { status: u16, body: String },

    /// The service answered but reported `success: false`
    #[error("rendering failed for {url}: {message}")]
    Unsuccessful { url: String, message: String },

    /// Neither `rawHtml` nor `html` was populated
    #[error("rendering returned no HTML for {url}")]
    EmptyDocument { url: String },

    /// Response body was not the expected JSON shape
    #[error("invalid rendering response: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Failures from the object store adapter.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to upload {key}: {source}")]
    Upload {
        key: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to download {url}: HTTP {status}")]
    DownloadStatus { url: String, status: u16 },

    #[error("failed to download {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to read {key}: {source}")]
    Read {
        key: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to list objects under {prefix}: {source}")]
    List {
        prefix: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to delete objects under {prefix}: {source}")]
    Delete {
        prefix: String,
        #[source]
        source: BoxError,
    },
}

impl StorageError {
    /// True for a download that reached the server and got a 404.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::DownloadStatus { status: 404, .. })
    }
}

/// A status update that did not match the record's current state.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{entity} {id} cannot move to {to}: not in {expected}")]
pub struct TransitionError {
    pub entity: &'static str,
    pub id: String,
    pub expected: &'static str,
    pub to: &'static str,
}
