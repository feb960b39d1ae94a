// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only. The archival worker and the asset
// pipeline depend on these, never on a concrete client.
//
// Naming convention: Base* for trait names (e.g., BaseObjectStore)

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::errors::{RenderError, StorageError};
use crate::common::{ArchiveJobId, SnapshotId, WebsiteId};
use crate::domains::jobs::models::ArchiveJob;
use crate::domains::snapshots::models::Snapshot;

// =============================================================================
// Object Store Trait (Infrastructure)
// =============================================================================

#[async_trait]
pub trait BaseObjectStore: Send + Sync {
    /// Store `body` under `key` (relative to the configured root prefix)
    async fn upload(&self, key: &str, body: Bytes, content_type: &str) -> Result<(), StorageError>;

    /// Fetch the bytes behind a public URL. Non-2xx responses are errors.
    async fn download(&self, url: &str) -> Result<Bytes, StorageError>;

    /// Read a stored object, `None` when the key does not exist
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StorageError>;

    /// All keys under `prefix`, relative to the root prefix
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Delete every object under `prefix`, returning how many were removed.
    ///
    /// A prefix with no objects is a no-op, not an error.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize, StorageError>;
}

// =============================================================================
// Page Renderer Trait (Infrastructure)
// =============================================================================

/// Page metadata reported by the rendering service
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status_code: Option<u16>,
    pub error: Option<String>,
}

/// A rendered page as returned by the rendering service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenderedPage {
    /// Cleaned HTML
    pub html: Option<String>,
    /// Unprocessed HTML, preferred when archiving
    pub raw_html: Option<String>,
    /// URL of a full-page screenshot
    pub screenshot: Option<String>,
    pub metadata: PageMetadata,
}

impl RenderedPage {
    /// The HTML to archive: raw HTML when present, cleaned HTML otherwise
    pub fn document(&self) -> Option<&str> {
        [self.raw_html.as_deref(), self.html.as_deref()]
            .into_iter()
            .flatten()
            .find(|html| !html.trim().is_empty())
    }
}

#[async_trait]
pub trait BasePageRenderer: Send + Sync {
    /// Render a URL to HTML (plus screenshot and metadata when available)
    async fn render(&self, url: &str) -> Result<RenderedPage, RenderError>;
}

// =============================================================================
// Archive Store Trait (Record repository used by the worker)
// =============================================================================

#[async_trait]
pub trait BaseArchiveStore: Send + Sync {
    /// Atomically move the oldest pending job to `processing`
    async fn claim_next_job(&self) -> Result<Option<ArchiveJob>>;

    /// Persist a new `processing` snapshot for a claimed job
    async fn create_snapshot(&self, job: &ArchiveJob) -> Result<Snapshot>;

    /// Move the snapshot and its job to `completed` together.
    ///
    /// Either both records change or neither does, so a failure here leaves
    /// the snapshot in `processing` where the failure path can still claim it.
    async fn finalize_success(
        &self,
        job_id: ArchiveJobId,
        snapshot_id: SnapshotId,
    ) -> Result<(ArchiveJob, Snapshot)>;

    async fn fail_snapshot(&self, id: SnapshotId, error: &str) -> Result<Snapshot>;

    async fn fail_job(&self, id: ArchiveJobId, error: &str) -> Result<ArchiveJob>;

    /// Append a completed snapshot to its website. `false` if nothing was linked.
    async fn link_snapshot(&self, website_id: WebsiteId, snapshot_id: SnapshotId) -> Result<bool>;
}
