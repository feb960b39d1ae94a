//! Job submission used by the request layer.

use anyhow::Result;
use sqlx::PgPool;
use tracing::info;

use crate::common::utils::{normalize_domain, validate_archive_url};
use crate::domains::jobs::models::ArchiveJob;
use crate::domains::website::models::Website;

/// Validate a URL, make sure its Website exists, and enqueue a pending job.
///
/// Invalid URLs are rejected here, before any record is written.
pub async fn submit_archive(url: &str, pool: &PgPool) -> Result<ArchiveJob> {
    let url = validate_archive_url(url)?;
    let domain = normalize_domain(url.as_str());

    let website = Website::find_or_create(&domain, url.as_str(), pool).await?;
    let job = ArchiveJob::enqueue(url.as_str(), website.id, pool).await?;

    info!(job_id = %job.id, website_id = %website.id, domain = %domain, "archive job enqueued");

    Ok(job)
}
