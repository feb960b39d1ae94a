use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::common::{SnapshotId, WebsiteId};
use crate::domains::snapshots::models::{Snapshot, SnapshotSummary};

/// Website - the aggregate record for one normalized domain
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Website {
    pub id: WebsiteId,
    pub domain: String,
    /// URL that first caused this website to be created
    pub original_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A website together with its linked (completed) snapshots
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebsiteArchive {
    pub id: WebsiteId,
    pub domain: String,
    pub original_url: String,
    pub snapshots: Vec<SnapshotSummary>,
}

impl Website {
    pub fn new(domain: impl Into<String>, original_url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: WebsiteId::new(),
            domain: domain.into(),
            original_url: original_url.into(),
            created_at: now,
            updated_at: now,
        }
    }

    // =========================================================================
    // SQL Queries
    // =========================================================================

    /// Find the website for a domain, creating it on first use.
    ///
    /// The unique index on `domain` makes concurrent first submissions
    /// converge on a single row; `original_url` keeps the first value seen.
    pub async fn find_or_create(domain: &str, original_url: &str, pool: &PgPool) -> Result<Self> {
        let candidate = Self::new(domain, original_url);

        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO websites (id, domain, original_url, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $4)
            ON CONFLICT (domain) DO UPDATE
            SET updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(candidate.id)
        .bind(&candidate.domain)
        .bind(&candidate.original_url)
        .bind(candidate.created_at)
        .fetch_one(pool)
        .await
        .with_context(|| format!("Failed to find or create website for {}", domain))
    }

    pub async fn find_by_id(id: WebsiteId, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM websites WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .context("Failed to fetch website")
    }

    pub async fn find_by_domain(domain: &str, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM websites WHERE domain = $1")
            .bind(domain)
            .fetch_optional(pool)
            .await
            .context("Failed to fetch website by domain")
    }

    /// Append a completed snapshot to the website's collection.
    ///
    /// Returns `false` when nothing was linked: the website does not exist,
    /// the snapshot is not `completed`, or the link is already present.
    pub async fn link_snapshot(
        website_id: WebsiteId,
        snapshot_id: SnapshotId,
        pool: &PgPool,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO website_snapshots (website_id, snapshot_id)
            SELECT w.id, s.id
            FROM websites w
            JOIN snapshots s ON s.id = $2 AND s.status = 'completed'
            WHERE w.id = $1
            ON CONFLICT (website_id, snapshot_id) DO NOTHING
            "#,
        )
        .bind(website_id)
        .bind(snapshot_id)
        .execute(pool)
        .await
        .context("Failed to link snapshot to website")?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query("UPDATE websites SET updated_at = NOW() WHERE id = $1")
            .bind(website_id)
            .execute(pool)
            .await?;

        Ok(true)
    }

    /// Linked snapshot ids in link order
    pub async fn snapshot_ids(website_id: WebsiteId, pool: &PgPool) -> Result<Vec<SnapshotId>> {
        sqlx::query_scalar::<_, SnapshotId>(
            "SELECT snapshot_id FROM website_snapshots
             WHERE website_id = $1
             ORDER BY linked_at ASC, snapshot_id ASC",
        )
        .bind(website_id)
        .fetch_all(pool)
        .await
        .context("Failed to fetch website snapshot ids")
    }

    /// Load a website with its linked snapshots as a typed DTO.
    pub async fn find_archive(website_id: WebsiteId, pool: &PgPool) -> Result<Option<WebsiteArchive>> {
        let Some(website) = Self::find_by_id(website_id, pool).await? else {
            return Ok(None);
        };

        let snapshots = Snapshot::find_linked_for_website(website.id, pool)
            .await?
            .into_iter()
            .map(SnapshotSummary::from)
            .collect();

        Ok(Some(WebsiteArchive {
            id: website.id,
            domain: website.domain,
            original_url: website.original_url,
            snapshots,
        }))
    }
}
