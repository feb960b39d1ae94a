//! ArchiveJob - one archive request for a URL
//!
//! Jobs are created `pending` by the submission layer and mutated only by the
//! archival worker. The claim is the single concurrency-control point: one
//! `UPDATE … RETURNING` that moves the oldest pending job to `processing`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, PgPool};

use crate::common::{ArchiveJobId, WebsiteId};
use crate::domains::website::models::{Website, WebsiteArchive};
use crate::kernel::errors::TransitionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "archive_job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ArchiveJobStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ArchiveJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveJobStatus::Pending => "pending",
            ArchiveJobStatus::Processing => "processing",
            ArchiveJobStatus::Completed => "completed",
            ArchiveJobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ArchiveJobStatus::Completed | ArchiveJobStatus::Failed)
    }

    /// Allowed forward moves: pending → processing → completed | failed
    pub fn can_transition_to(&self, next: ArchiveJobStatus) -> bool {
        matches!(
            (self, next),
            (ArchiveJobStatus::Pending, ArchiveJobStatus::Processing)
                | (ArchiveJobStatus::Processing, ArchiveJobStatus::Completed)
                | (ArchiveJobStatus::Processing, ArchiveJobStatus::Failed)
        )
    }
}

impl std::fmt::Display for ArchiveJobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ArchiveJob {
    pub id: ArchiveJobId,
    pub url_to_archive: String,
    pub website_id: WebsiteId,
    pub status: ArchiveJobStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Set when the job is claimed
    pub processed_at: Option<DateTime<Utc>>,
}

/// Job status as returned to clients polling for completion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusView {
    pub job_id: ArchiveJobId,
    pub status: ArchiveJobStatus,
    pub error: Option<String>,
    pub url_to_archive: String,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    /// Populated once the job has completed
    pub website: Option<WebsiteArchive>,
}

impl ArchiveJob {
    pub fn new_pending(url_to_archive: impl Into<String>, website_id: WebsiteId) -> Self {
        Self {
            id: ArchiveJobId::new(),
            url_to_archive: url_to_archive.into(),
            website_id,
            status: ArchiveJobStatus::Pending,
            error: None,
            created_at: Utc::now(),
            processed_at: None,
        }
    }

    // =========================================================================
    // SQL Queries
    // =========================================================================

    /// Insert a new pending job for a website.
    pub async fn enqueue(url_to_archive: &str, website_id: WebsiteId, pool: &PgPool) -> Result<Self> {
        let job = Self::new_pending(url_to_archive, website_id);

        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO archive_jobs (id, url_to_archive, website_id, status, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(job.id)
        .bind(&job.url_to_archive)
        .bind(job.website_id)
        .bind(job.status)
        .bind(job.created_at)
        .fetch_one(pool)
        .await
        .context("Failed to enqueue archive job")
    }

    pub async fn find_by_id(id: ArchiveJobId, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM archive_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .context("Failed to fetch archive job")
    }

    /// Claim the oldest pending job.
    ///
    /// `FOR UPDATE SKIP LOCKED` keeps concurrent claimers off the same row and
    /// the outer `status = 'pending'` guard makes the update a compare-and-swap:
    /// a job is returned to exactly one caller.
    pub async fn claim_next(pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE archive_jobs
            SET status = 'processing',
                processed_at = NOW()
            WHERE id = (
                SELECT id
                FROM archive_jobs
                WHERE status = 'pending'
                ORDER BY created_at ASC, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            AND status = 'pending'
            RETURNING *
            "#,
        )
        .fetch_optional(pool)
        .await
        .context("Failed to claim archive job")
    }

    /// `processing` → `completed`
    ///
    /// Takes any executor so the worker can complete the job in the same
    /// transaction as its snapshot.
    pub async fn mark_completed<'e, E>(id: ArchiveJobId, executor: E) -> Result<Self>
    where
        E: PgExecutor<'e>,
    {
        let job = sqlx::query_as::<_, Self>(
            r#"
            UPDATE archive_jobs
            SET status = 'completed'
            WHERE id = $1 AND status = 'processing'
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(executor)
        .await
        .context("Failed to mark archive job completed")?;

        job.ok_or_else(|| transition_error(id, ArchiveJobStatus::Completed).into())
    }

    /// `processing` → `failed`, recording the error message
    pub async fn mark_failed(id: ArchiveJobId, error: &str, pool: &PgPool) -> Result<Self> {
        let job = sqlx::query_as::<_, Self>(
            r#"
            UPDATE archive_jobs
            SET status = 'failed',
                error = $2
            WHERE id = $1 AND status = 'processing'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(error)
        .fetch_optional(pool)
        .await
        .context("Failed to mark archive job failed")?;

        job.ok_or_else(|| transition_error(id, ArchiveJobStatus::Failed).into())
    }

    /// Job status with the website's snapshots once the job has completed.
    pub async fn find_status(id: ArchiveJobId, pool: &PgPool) -> Result<Option<JobStatusView>> {
        let Some(job) = Self::find_by_id(id, pool).await? else {
            return Ok(None);
        };

        let website = if job.status == ArchiveJobStatus::Completed {
            Website::find_archive(job.website_id, pool).await?
        } else {
            None
        };

        Ok(Some(JobStatusView {
            job_id: job.id,
            status: job.status,
            error: job.error,
            url_to_archive: job.url_to_archive,
            created_at: job.created_at,
            processed_at: job.processed_at,
            website,
        }))
    }
}

pub(crate) fn transition_error(id: ArchiveJobId, to: ArchiveJobStatus) -> TransitionError {
    TransitionError {
        entity: "archive job",
        id: id.to_string(),
        expected: ArchiveJobStatus::Processing.as_str(),
        to: to.as_str(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_pending_job() {
        let website_id = WebsiteId::new();
        let job = ArchiveJob::new_pending("https://example.com/", website_id);

        assert_eq!(job.status, ArchiveJobStatus::Pending);
        assert_eq!(job.website_id, website_id);
        assert!(job.error.is_none());
        assert!(job.processed_at.is_none());
    }

    #[test]
    fn test_transitions_only_move_forward() {
        use ArchiveJobStatus::*;

        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Processing.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Processing));
        assert!(!Failed.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Failed));
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&ArchiveJobStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
    }

    #[test]
    fn test_transition_error_message() {
        let id = ArchiveJobId::new();
        let err = transition_error(id, ArchiveJobStatus::Completed);
        assert_eq!(
            err.to_string(),
            format!("archive job {} cannot move to completed: not in processing", id)
        );
    }
}
