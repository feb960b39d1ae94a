//! Integration tests for the Postgres record store: claims, guarded status
//! transitions, and website-snapshot linkage.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use archiver_core::domains::jobs::models::{ArchiveJob, ArchiveJobStatus};
use archiver_core::domains::snapshots::models::{Snapshot, SnapshotStatus};
use archiver_core::domains::website::models::Website;
use archiver_core::kernel::{BaseArchiveStore, PostgresArchiveStore, TransitionError};
use test_context::test_context;

use crate::common::TestHarness;

async fn website(ctx: &TestHarness) -> Website {
    Website::find_or_create("example.com", "https://example.com/", &ctx.db_pool)
        .await
        .expect("Failed to create website")
}

// =============================================================================
// Claims
// =============================================================================

#[test_context(TestHarness)]
#[tokio::test]
async fn claim_returns_none_when_queue_is_empty(ctx: &TestHarness) {
    let store = PostgresArchiveStore::new(ctx.db_pool.clone());
    assert!(store.claim_next_job().await.unwrap().is_none());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn claims_are_fifo(ctx: &TestHarness) {
    let website = website(ctx).await;
    let first = ArchiveJob::enqueue("https://example.com/1", website.id, &ctx.db_pool)
        .await
        .unwrap();
    let second = ArchiveJob::enqueue("https://example.com/2", website.id, &ctx.db_pool)
        .await
        .unwrap();

    let store = PostgresArchiveStore::new(ctx.db_pool.clone());

    let claimed = store.claim_next_job().await.unwrap().unwrap();
    assert_eq!(claimed.id, first.id);
    assert_eq!(claimed.status, ArchiveJobStatus::Processing);
    assert!(claimed.processed_at.is_some());

    let claimed = store.claim_next_job().await.unwrap().unwrap();
    assert_eq!(claimed.id, second.id);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn concurrent_claimers_never_share_a_job(ctx: &TestHarness) {
    let website = website(ctx).await;
    let mut enqueued = HashSet::new();
    for i in 0..20 {
        let job = ArchiveJob::enqueue(&format!("https://example.com/{}", i), website.id, &ctx.db_pool)
            .await
            .unwrap();
        enqueued.insert(job.id);
    }

    let store = Arc::new(PostgresArchiveStore::new(ctx.db_pool.clone()));
    let mut workers = Vec::new();
    for _ in 0..8 {
        let store = Arc::clone(&store);
        workers.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            while let Some(job) = store.claim_next_job().await.unwrap() {
                claimed.push(job.id);
            }
            claimed
        }));
    }

    let mut all_claimed = Vec::new();
    for worker in workers {
        all_claimed.extend(worker.await.unwrap());
    }

    let unique: HashSet<_> = all_claimed.iter().copied().collect();
    assert_eq!(all_claimed.len(), 20, "a job was claimed more than once");
    assert_eq!(unique, enqueued);
}

// =============================================================================
// Status transitions
// =============================================================================

#[test_context(TestHarness)]
#[tokio::test]
async fn job_transitions_are_guarded(ctx: &TestHarness) {
    let website = website(ctx).await;
    let job = ArchiveJob::enqueue("https://example.com/", website.id, &ctx.db_pool)
        .await
        .unwrap();
    let store = PostgresArchiveStore::new(ctx.db_pool.clone());

    // Pending jobs cannot skip processing
    let err = ArchiveJob::mark_completed(job.id, &ctx.db_pool).await.unwrap_err();
    assert!(err.downcast_ref::<TransitionError>().is_some());

    let claimed = store.claim_next_job().await.unwrap().unwrap();
    let snapshot = store.create_snapshot(&claimed).await.unwrap();
    let (completed, snapshot) = store.finalize_success(job.id, snapshot.id).await.unwrap();
    assert_eq!(completed.status, ArchiveJobStatus::Completed);
    assert_eq!(snapshot.status, SnapshotStatus::Completed);

    let err = store.fail_job(job.id, "too late").await.unwrap_err();
    assert!(err.downcast_ref::<TransitionError>().is_some());

    let stored = ArchiveJob::find_by_id(job.id, &ctx.db_pool).await.unwrap().unwrap();
    assert_eq!(stored.status, ArchiveJobStatus::Completed);
    assert!(stored.error.is_none());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn snapshot_transitions_are_guarded(ctx: &TestHarness) {
    let website = website(ctx).await;
    ArchiveJob::enqueue("https://example.com/docs", website.id, &ctx.db_pool)
        .await
        .unwrap();
    let store = PostgresArchiveStore::new(ctx.db_pool.clone());

    let job = store.claim_next_job().await.unwrap().unwrap();
    let snapshot = store.create_snapshot(&job).await.unwrap();
    assert_eq!(snapshot.status, SnapshotStatus::Processing);
    assert_eq!(snapshot.path, "/docs");
    assert_eq!(snapshot.storage_path, format!("snapshots/{}", snapshot.id));

    let failed = store.fail_snapshot(snapshot.id, "render failed").await.unwrap();
    assert_eq!(failed.status, SnapshotStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("render failed"));

    assert!(store.finalize_success(job.id, snapshot.id).await.is_err());

    let stored = Snapshot::find_by_id(snapshot.id, &ctx.db_pool).await.unwrap().unwrap();
    assert_eq!(stored.status, SnapshotStatus::Failed);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn finalize_rolls_back_when_job_cannot_complete(ctx: &TestHarness) {
    let website = website(ctx).await;
    ArchiveJob::enqueue("https://example.com/", website.id, &ctx.db_pool)
        .await
        .unwrap();
    let store = PostgresArchiveStore::new(ctx.db_pool.clone());

    let job = store.claim_next_job().await.unwrap().unwrap();
    let snapshot = store.create_snapshot(&job).await.unwrap();
    // The job leaves `processing` underneath the worker
    store.fail_job(job.id, "timed out").await.unwrap();

    let err = store.finalize_success(job.id, snapshot.id).await.unwrap_err();
    assert!(err.downcast_ref::<TransitionError>().is_some());

    // The snapshot update ran first and was rolled back with the job update
    let stored = Snapshot::find_by_id(snapshot.id, &ctx.db_pool).await.unwrap().unwrap();
    assert_eq!(stored.status, SnapshotStatus::Processing);

    // So the failure path can still claim it
    let failed = store.fail_snapshot(snapshot.id, "timed out").await.unwrap();
    assert_eq!(failed.status, SnapshotStatus::Failed);
}

// =============================================================================
// Linking
// =============================================================================

#[test_context(TestHarness)]
#[tokio::test]
async fn only_completed_snapshots_are_linked(ctx: &TestHarness) {
    let website = website(ctx).await;
    ArchiveJob::enqueue("https://example.com/", website.id, &ctx.db_pool)
        .await
        .unwrap();
    let store = PostgresArchiveStore::new(ctx.db_pool.clone());

    let job = store.claim_next_job().await.unwrap().unwrap();
    let snapshot = store.create_snapshot(&job).await.unwrap();

    assert!(!store.link_snapshot(website.id, snapshot.id).await.unwrap());

    store.finalize_success(job.id, snapshot.id).await.unwrap();
    assert!(store.link_snapshot(website.id, snapshot.id).await.unwrap());
    // Linking twice is a no-op
    assert!(!store.link_snapshot(website.id, snapshot.id).await.unwrap());

    let linked = Website::snapshot_ids(website.id, &ctx.db_pool).await.unwrap();
    assert_eq!(linked, vec![snapshot.id]);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn job_status_includes_website_once_completed(ctx: &TestHarness) {
    let website = website(ctx).await;
    let job = ArchiveJob::enqueue("https://example.com/", website.id, &ctx.db_pool)
        .await
        .unwrap();
    let store = PostgresArchiveStore::new(ctx.db_pool.clone());

    let pending = ArchiveJob::find_status(job.id, &ctx.db_pool).await.unwrap().unwrap();
    assert_eq!(pending.status, ArchiveJobStatus::Pending);
    assert!(pending.website.is_none());

    let claimed = store.claim_next_job().await.unwrap().unwrap();
    let snapshot = store.create_snapshot(&claimed).await.unwrap();
    store.finalize_success(job.id, snapshot.id).await.unwrap();
    store.link_snapshot(website.id, snapshot.id).await.unwrap();

    let done = ArchiveJob::find_status(job.id, &ctx.db_pool).await.unwrap().unwrap();
    assert_eq!(done.status, ArchiveJobStatus::Completed);
    let archive = done.website.unwrap();
    assert_eq!(archive.domain, "example.com");
    assert_eq!(archive.snapshots.len(), 1);
    assert_eq!(archive.snapshots[0].id, snapshot.id);
    assert_eq!(archive.snapshots[0].status, SnapshotStatus::Completed);
}
