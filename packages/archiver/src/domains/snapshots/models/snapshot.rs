//! Snapshot - one concrete archived capture of a page
//!
//! A snapshot owns the object-store namespace `snapshots/<id>/`. The id (and
//! with it the storage path) is generated before the row is inserted, so the
//! worker always knows which prefix to clean up if the job fails.
//!
//! Status lifecycle: `processing` → `completed` | `failed`. Both terminal
//! transitions are guarded on `status = 'processing'`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, PgPool};

use crate::common::utils::extract_path;
use crate::common::{ArchiveJobId, SnapshotId, WebsiteId};
use crate::domains::jobs::models::ArchiveJob;
use crate::kernel::errors::TransitionError;

/// File opened first when replaying a snapshot
pub const ENTRYPOINT: &str = "index.html";

/// Screenshot stored next to the entrypoint
pub const THUMBNAIL: &str = "thumbnail.png";

/// Directory (relative to the storage path) holding rewritten assets
pub const ASSET_DIR: &str = "_assets";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "snapshot_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SnapshotStatus {
    Processing,
    Completed,
    Failed,
}

impl SnapshotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotStatus::Processing => "processing",
            SnapshotStatus::Completed => "completed",
            SnapshotStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SnapshotStatus::Processing)
    }
}

impl std::fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub website_id: WebsiteId,
    pub path: String,
    pub status: SnapshotStatus,
    /// Object-store prefix owned by this snapshot
    pub storage_path: String,
    pub entrypoint: String,
    pub job_id: ArchiveJobId,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Read-side view of a snapshot, as listed under its website
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotSummary {
    pub id: SnapshotId,
    pub path: String,
    pub status: SnapshotStatus,
    pub storage_path: String,
    pub entrypoint: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Snapshot> for SnapshotSummary {
    fn from(snapshot: Snapshot) -> Self {
        Self {
            id: snapshot.id,
            path: snapshot.path,
            status: snapshot.status,
            storage_path: snapshot.storage_path,
            entrypoint: snapshot.entrypoint,
            created_at: snapshot.created_at,
            updated_at: snapshot.updated_at,
        }
    }
}

impl Snapshot {
    /// Build a new `processing` snapshot for a claimed job.
    pub fn for_job(job: &ArchiveJob) -> Self {
        let id = SnapshotId::new();
        let now = Utc::now();
        Self {
            id,
            website_id: job.website_id,
            path: extract_path(&job.url_to_archive),
            status: SnapshotStatus::Processing,
            storage_path: Self::storage_prefix(id),
            entrypoint: ENTRYPOINT.to_string(),
            job_id: job.id,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn storage_prefix(id: SnapshotId) -> String {
        format!("snapshots/{}", id)
    }

    /// Key of the rewritten HTML document
    pub fn entrypoint_key(&self) -> String {
        format!("{}/{}", self.storage_path, self.entrypoint)
    }

    pub fn thumbnail_key(&self) -> String {
        format!("{}/{}", self.storage_path, THUMBNAIL)
    }

    // =========================================================================
    // SQL Queries
    // =========================================================================

    pub async fn insert(&self, pool: &PgPool) -> Result<Self> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO snapshots
                (id, website_id, path, status, storage_path, entrypoint, job_id, error, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(self.id)
        .bind(self.website_id)
        .bind(&self.path)
        .bind(self.status)
        .bind(&self.storage_path)
        .bind(&self.entrypoint)
        .bind(self.job_id)
        .bind(&self.error)
        .bind(self.created_at)
        .bind(self.updated_at)
        .fetch_one(pool)
        .await
        .context("Failed to insert snapshot")
    }

    pub async fn find_by_id(id: SnapshotId, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM snapshots WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .context("Failed to fetch snapshot")
    }

    pub async fn find_by_job(job_id: ArchiveJobId, pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM snapshots WHERE job_id = $1 ORDER BY created_at ASC",
        )
        .bind(job_id)
        .fetch_all(pool)
        .await
        .context("Failed to fetch snapshots for job")
    }

    /// Snapshots linked into a website's collection, in link order
    pub async fn find_linked_for_website(website_id: WebsiteId, pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT s.*
            FROM website_snapshots ws
            INNER JOIN snapshots s ON s.id = ws.snapshot_id
            WHERE ws.website_id = $1
            ORDER BY ws.linked_at ASC, s.id ASC
            "#,
        )
        .bind(website_id)
        .fetch_all(pool)
        .await
        .context("Failed to fetch linked snapshots")
    }

    /// `processing` → `completed`
    pub async fn mark_completed<'e, E>(id: SnapshotId, executor: E) -> Result<Self>
    where
        E: PgExecutor<'e>,
    {
        let snapshot = sqlx::query_as::<_, Self>(
            r#"
            UPDATE snapshots
            SET status = 'completed',
                updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(executor)
        .await
        .context("Failed to mark snapshot completed")?;

        snapshot.ok_or_else(|| transition_error(id, SnapshotStatus::Completed).into())
    }

    /// `processing` → `failed`, recording the error message
    pub async fn mark_failed(id: SnapshotId, error: &str, pool: &PgPool) -> Result<Self> {
        let snapshot = sqlx::query_as::<_, Self>(
            r#"
            UPDATE snapshots
            SET status = 'failed',
                error = $2,
                updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(error)
        .fetch_optional(pool)
        .await
        .context("Failed to mark snapshot failed")?;

        snapshot.ok_or_else(|| transition_error(id, SnapshotStatus::Failed).into())
    }
}

pub(crate) fn transition_error(id: SnapshotId, to: SnapshotStatus) -> TransitionError {
    TransitionError {
        entity: "snapshot",
        id: id.to_string(),
        expected: SnapshotStatus::Processing.as_str(),
        to: to.as_str(),
    }
}
