//! Processes one claimed archive job end to end.
//!
//! ```text
//! claim job ─► create snapshot (processing)
//!     ├─► render URL
//!     ├─► asset pipeline (download, store, rewrite)
//!     ├─► upload index.html, thumbnail (best effort)
//!     ├─► ok:  snapshot and job completed together, link to website
//!     └─► err: snapshot failed, job failed, delete snapshot prefix
//! ```

use anyhow::{Context, Result};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::domains::jobs::models::ArchiveJob;
use crate::domains::snapshots::models::Snapshot;
use crate::domains::snapshots::{AssetPipeline, AssetReport};
use crate::kernel::errors::RenderError;
use crate::kernel::{BaseArchiveStore, BaseObjectStore, BasePageRenderer};

const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

pub struct ArchiveWorker {
    store: Arc<dyn BaseArchiveStore>,
    renderer: Arc<dyn BasePageRenderer>,
    objects: Arc<dyn BaseObjectStore>,
    pipeline: AssetPipeline,
}

impl ArchiveWorker {
    pub fn new(
        store: Arc<dyn BaseArchiveStore>,
        renderer: Arc<dyn BasePageRenderer>,
        objects: Arc<dyn BaseObjectStore>,
        asset_concurrency: usize,
    ) -> Self {
        let pipeline = AssetPipeline::new(Arc::clone(&objects), asset_concurrency);
        Self {
            store,
            renderer,
            objects,
            pipeline,
        }
    }

    /// Claim and process the oldest pending job.
    ///
    /// Returns the job in its final state, or `None` when the queue is empty.
    /// A job that fails is still `Ok`; errors here mean the record store could
    /// not be reached or the failure itself could not be recorded.
    pub async fn process_next_job(&self) -> Result<Option<ArchiveJob>> {
        let Some(job) = self.store.claim_next_job().await? else {
            return Ok(None);
        };

        info!(job_id = %job.id, url = %job.url_to_archive, "archive job claimed");

        self.process_job(job).await.map(Some)
    }

    /// Process a job that is already in `processing`.
    pub async fn process_job(&self, job: ArchiveJob) -> Result<ArchiveJob> {
        let snapshot = match self.store.create_snapshot(&job).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                // Nothing was written to the object store yet
                let message = format!("{:#}", e.context("Failed to create snapshot"));
                error!(job_id = %job.id, error = %message, "archive job failed");
                return self.store.fail_job(job.id, &message).await;
            }
        };

        debug!(
            job_id = %job.id,
            snapshot_id = %snapshot.id,
            storage_path = %snapshot.storage_path,
            "snapshot created"
        );

        let outcome = match self.capture(&job, &snapshot).await {
            Ok(report) => self.finalize(&job, &snapshot, report).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(job) => Ok(job),
            Err(e) => self.fail(&job, &snapshot, e).await,
        }
    }

    /// Render the page, archive its assets and store the HTML entrypoint.
    async fn capture(&self, job: &ArchiveJob, snapshot: &Snapshot) -> Result<AssetReport> {
        let url = &job.url_to_archive;

        let page = self
            .renderer
            .render(url)
            .await
            .with_context(|| format!("Failed to render {}", url))?;

        let html = page
            .document()
            .ok_or_else(|| RenderError::EmptyDocument { url: url.clone() })?;

        let (rewritten, report) = self
            .pipeline
            .process_html(html, &snapshot.storage_path, url)
            .await?;

        self.objects
            .upload(&snapshot.entrypoint_key(), Bytes::from(rewritten), HTML_CONTENT_TYPE)
            .await
            .context("Failed to upload archived HTML")?;

        if let Some(screenshot) = &page.screenshot {
            self.pipeline
                .store_screenshot(screenshot, &snapshot.storage_path)
                .await;
        }

        Ok(report)
    }

    async fn finalize(
        &self,
        job: &ArchiveJob,
        snapshot: &Snapshot,
        report: AssetReport,
    ) -> Result<ArchiveJob> {
        let (completed, _) = self
            .store
            .finalize_success(job.id, snapshot.id)
            .await
            .context("Failed to record completed archive")?;

        // Both records are terminal now; a linking problem cannot undo them
        match self.store.link_snapshot(job.website_id, snapshot.id).await {
            Ok(true) => {}
            Ok(false) => warn!(
                job_id = %job.id,
                website_id = %job.website_id,
                snapshot_id = %snapshot.id,
                "website not found, snapshot not linked"
            ),
            Err(e) => error!(
                job_id = %job.id,
                snapshot_id = %snapshot.id,
                error = %e,
                "failed to link snapshot to website"
            ),
        }

        info!(
            job_id = %job.id,
            snapshot_id = %snapshot.id,
            assets = report.discovered,
            assets_failed = report.failed,
            "archive job completed"
        );

        Ok(completed)
    }

    /// Record the failure on both records and release the snapshot's objects.
    async fn fail(
        &self,
        job: &ArchiveJob,
        snapshot: &Snapshot,
        err: anyhow::Error,
    ) -> Result<ArchiveJob> {
        let message = format!("{:#}", err);
        error!(job_id = %job.id, snapshot_id = %snapshot.id, error = %message, "archive job failed");

        let snapshot_failed = match self.store.fail_snapshot(snapshot.id, &message).await {
            Ok(_) => true,
            Err(e) => {
                error!(snapshot_id = %snapshot.id, error = %e, "failed to mark snapshot as failed");
                false
            }
        };

        let failed_job = self.store.fail_job(job.id, &message).await;

        // A snapshot that reached `completed` keeps its objects
        if snapshot_failed {
            self.cleanup(snapshot).await;
        }

        failed_job
    }

    async fn cleanup(&self, snapshot: &Snapshot) {
        match self.objects.delete_prefix(&snapshot.storage_path).await {
            Ok(0) => {}
            Ok(deleted) => info!(
                snapshot_id = %snapshot.id,
                storage_path = %snapshot.storage_path,
                deleted,
                "cleaned up failed snapshot"
            ),
            Err(e) => warn!(
                snapshot_id = %snapshot.id,
                storage_path = %snapshot.storage_path,
                error = %e,
                "failed to clean up snapshot objects"
            ),
        }
    }
}
