//! Implementation of `BaseArchiveStore` over the Postgres models.
//!
//! This module bridges the worker's record interface with the SQL that lives
//! in `domains/*/models`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;

use super::BaseArchiveStore;
use crate::common::{ArchiveJobId, SnapshotId, WebsiteId};
use crate::domains::jobs::models::ArchiveJob;
use crate::domains::snapshots::models::Snapshot;
use crate::domains::website::models::Website;

/// Postgres-backed record store for the archival worker.
#[derive(Clone)]
pub struct PostgresArchiveStore {
    pool: PgPool,
}

impl PostgresArchiveStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BaseArchiveStore for PostgresArchiveStore {
    async fn claim_next_job(&self) -> Result<Option<ArchiveJob>> {
        ArchiveJob::claim_next(&self.pool).await
    }

    async fn create_snapshot(&self, job: &ArchiveJob) -> Result<Snapshot> {
        Snapshot::for_job(job).insert(&self.pool).await
    }

    async fn finalize_success(
        &self,
        job_id: ArchiveJobId,
        snapshot_id: SnapshotId,
    ) -> Result<(ArchiveJob, Snapshot)> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin finalize transaction")?;

        // Dropping `tx` on an early return rolls both updates back
        let snapshot = Snapshot::mark_completed(snapshot_id, &mut *tx).await?;
        let job = ArchiveJob::mark_completed(job_id, &mut *tx).await?;

        tx.commit()
            .await
            .context("Failed to commit finalize transaction")?;

        Ok((job, snapshot))
    }

    async fn fail_snapshot(&self, id: SnapshotId, error: &str) -> Result<Snapshot> {
        Snapshot::mark_failed(id, error, &self.pool).await
    }

    async fn fail_job(&self, id: ArchiveJobId, error: &str) -> Result<ArchiveJob> {
        ArchiveJob::mark_failed(id, error, &self.pool).await
    }

    async fn link_snapshot(&self, website_id: WebsiteId, snapshot_id: SnapshotId) -> Result<bool> {
        Website::link_snapshot(website_id, snapshot_id, &self.pool).await
    }
}
