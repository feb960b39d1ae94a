// In-memory implementations of the infrastructure traits for tests.
//
// These let the archival worker and the asset pipeline run end to end without
// Postgres, an S3 bucket, or the rendering service.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::errors::{RenderError, StorageError};
use super::{BaseArchiveStore, BaseObjectStore, BasePageRenderer, RenderedPage};
use crate::common::{ArchiveJobId, SnapshotId, WebsiteId};
use crate::domains::jobs::models::{archive_job, ArchiveJob, ArchiveJobStatus};
use crate::domains::snapshots::models::{snapshot, Snapshot, SnapshotStatus};
use crate::domains::website::models::Website;

/// Poisoned locks only happen after a panicking test; keep the data anyway.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// Memory Object Store
// =============================================================================

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub body: Bytes,
    pub content_type: String,
}

#[derive(Debug, Clone)]
enum RemoteResponse {
    Body(Bytes),
    Status(u16),
}

pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    remote: Mutex<HashMap<String, RemoteResponse>>,
    failing_uploads: Mutex<Vec<String>>,
    download_calls: Mutex<Vec<String>>,
    download_delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            remote: Mutex::new(HashMap::new()),
            failing_uploads: Mutex::new(Vec::new()),
            download_calls: Mutex::new(Vec::new()),
            download_delay: Mutex::new(None),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Serve `body` for downloads of `url`
    pub fn with_remote(self, url: &str, body: impl Into<Bytes>) -> Self {
        lock(&self.remote).insert(url.to_string(), RemoteResponse::Body(body.into()));
        self
    }

    /// Answer downloads of `url` with an HTTP error status
    pub fn with_remote_status(self, url: &str, status: u16) -> Self {
        lock(&self.remote).insert(url.to_string(), RemoteResponse::Status(status));
        self
    }

    /// Reject uploads whose key contains `pattern`
    pub fn fail_uploads_matching(self, pattern: &str) -> Self {
        lock(&self.failing_uploads).push(pattern.to_string());
        self
    }

    /// Hold every download for `delay`, so concurrent fetches overlap
    pub fn with_download_delay(self, delay: Duration) -> Self {
        *lock(&self.download_delay) = Some(delay);
        self
    }

    /// Seed an object directly, bypassing upload failure rules
    pub fn put(&self, key: &str, body: impl Into<Bytes>, content_type: &str) {
        lock(&self.objects).insert(
            key.to_string(),
            StoredObject {
                body: body.into(),
                content_type: content_type.to_string(),
            },
        );
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        lock(&self.objects).get(key).cloned()
    }

    pub fn text(&self, key: &str) -> Option<String> {
        self.object(key)
            .map(|o| String::from_utf8_lossy(&o.body).into_owned())
    }

    pub fn keys(&self) -> Vec<String> {
        lock(&self.objects).keys().cloned().collect()
    }

    pub fn keys_under(&self, prefix: &str) -> Vec<String> {
        lock(&self.objects)
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn download_calls(&self) -> Vec<String> {
        lock(&self.download_calls).clone()
    }

    /// Highest number of downloads observed running at the same time
    pub fn max_concurrent_downloads(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BaseObjectStore for MemoryObjectStore {
    async fn upload(&self, key: &str, body: Bytes, content_type: &str) -> Result<(), StorageError> {
        if lock(&self.failing_uploads).iter().any(|p| key.contains(p.as_str())) {
            return Err(StorageError::Upload {
                key: key.to_string(),
                source: "simulated upload failure".into(),
            });
        }

        self.put(key, body, content_type);
        Ok(())
    }

    async fn download(&self, url: &str) -> Result<Bytes, StorageError> {
        lock(&self.download_calls).push(url.to_string());

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let delay = *lock(&self.download_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let response = lock(&self.remote).get(url).cloned();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match response {
            Some(RemoteResponse::Body(body)) => Ok(body),
            Some(RemoteResponse::Status(status)) => Err(StorageError::DownloadStatus {
                url: url.to_string(),
                status,
            }),
            None => Err(StorageError::DownloadStatus {
                url: url.to_string(),
                status: 404,
            }),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, StorageError> {
        Ok(self.object(key).map(|o| o.body))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self.keys_under(prefix))
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize, StorageError> {
        let prefix = format!("{}/", prefix.trim_end_matches('/'));
        let mut objects = lock(&self.objects);
        let before = objects.len();
        objects.retain(|key, _| !key.starts_with(&prefix));
        Ok(before - objects.len())
    }
}

// =============================================================================
// Mock Page Renderer
// =============================================================================

pub struct MockPageRenderer {
    responses: Mutex<VecDeque<Result<RenderedPage, RenderError>>>,
    calls: Mutex<Vec<String>>,
}

impl Default for MockPageRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPageRenderer {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_page(self, page: RenderedPage) -> Self {
        lock(&self.responses).push_back(Ok(page));
        self
    }

    /// Queue a page whose raw HTML is `html`
    pub fn with_html(self, html: &str) -> Self {
        self.with_page(RenderedPage {
            raw_html: Some(html.to_string()),
            ..Default::default()
        })
    }

    pub fn with_error(self, error: RenderError) -> Self {
        lock(&self.responses).push_back(Err(error));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl BasePageRenderer for MockPageRenderer {
    async fn render(&self, url: &str) -> Result<RenderedPage, RenderError> {
        lock(&self.calls).push(url.to_string());

        lock(&self.responses)
            .pop_front()
            .unwrap_or_else(|| {
                Err(RenderError::Unsuccessful {
                    url: url.to_string(),
                    message: "no mock response queued".to_string(),
                })
            })
    }
}

// =============================================================================
// Memory Archive Store
// =============================================================================

#[derive(Default)]
struct ArchiveState {
    websites: Vec<Website>,
    jobs: Vec<ArchiveJob>,
    snapshots: Vec<Snapshot>,
    links: Vec<(WebsiteId, SnapshotId)>,
}

/// Record store with the same transition rules as the Postgres models.
#[derive(Default)]
pub struct MemoryArchiveStore {
    state: Mutex<ArchiveState>,
    fail_snapshot_creation: AtomicBool,
    fail_job_completion: AtomicBool,
}

impl MemoryArchiveStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `create_snapshot` call fail
    pub fn failing_snapshot_creation(self) -> Self {
        self.fail_snapshot_creation.store(true, Ordering::SeqCst);
        self
    }

    /// Make `finalize_success` fail at the job update, after the snapshot
    /// update succeeded, the way a dropped connection mid-transaction would
    pub fn failing_job_completion(self) -> Self {
        self.fail_job_completion.store(true, Ordering::SeqCst);
        self
    }

    pub fn insert_website(&self, domain: &str, original_url: &str) -> Website {
        let mut state = lock(&self.state);
        if let Some(existing) = state.websites.iter().find(|w| w.domain == domain) {
            return existing.clone();
        }
        let website = Website::new(domain, original_url);
        state.websites.push(website.clone());
        website
    }

    /// Forget a website while keeping its jobs, to exercise dangling references
    pub fn remove_website(&self, id: WebsiteId) {
        lock(&self.state).websites.retain(|w| w.id != id);
    }

    pub fn enqueue(&self, url: &str, website_id: WebsiteId) -> ArchiveJob {
        let job = ArchiveJob::new_pending(url, website_id);
        lock(&self.state).jobs.push(job.clone());
        job
    }

    pub fn job(&self, id: ArchiveJobId) -> Option<ArchiveJob> {
        lock(&self.state).jobs.iter().find(|j| j.id == id).cloned()
    }

    pub fn snapshot(&self, id: SnapshotId) -> Option<Snapshot> {
        lock(&self.state).snapshots.iter().find(|s| s.id == id).cloned()
    }

    pub fn snapshots_for_job(&self, job_id: ArchiveJobId) -> Vec<Snapshot> {
        lock(&self.state)
            .snapshots
            .iter()
            .filter(|s| s.job_id == job_id)
            .cloned()
            .collect()
    }

    /// Snapshot ids linked to a website, in link order
    pub fn linked_snapshots(&self, website_id: WebsiteId) -> Vec<SnapshotId> {
        lock(&self.state)
            .links
            .iter()
            .filter(|(w, _)| *w == website_id)
            .map(|(_, s)| *s)
            .collect()
    }
}

#[async_trait]
impl BaseArchiveStore for MemoryArchiveStore {
    async fn claim_next_job(&self) -> Result<Option<ArchiveJob>> {
        let mut state = lock(&self.state);

        let next = state
            .jobs
            .iter_mut()
            .filter(|j| j.status == ArchiveJobStatus::Pending)
            .min_by_key(|j| (j.created_at, j.id));

        Ok(next.map(|job| {
            job.status = ArchiveJobStatus::Processing;
            job.processed_at = Some(chrono::Utc::now());
            job.clone()
        }))
    }

    async fn create_snapshot(&self, job: &ArchiveJob) -> Result<Snapshot> {
        if self.fail_snapshot_creation.load(Ordering::SeqCst) {
            anyhow::bail!("simulated snapshot insert failure");
        }

        let snapshot = Snapshot::for_job(job);
        lock(&self.state).snapshots.push(snapshot.clone());
        Ok(snapshot)
    }

    async fn finalize_success(
        &self,
        job_id: ArchiveJobId,
        snapshot_id: SnapshotId,
    ) -> Result<(ArchiveJob, Snapshot)> {
        let mut state = lock(&self.state);

        // Check both guards before touching either record
        let snapshot_idx = state
            .snapshots
            .iter()
            .position(|s| s.id == snapshot_id && s.status == SnapshotStatus::Processing)
            .ok_or_else(|| snapshot::transition_error(snapshot_id, SnapshotStatus::Completed))?;

        if self.fail_job_completion.load(Ordering::SeqCst) {
            anyhow::bail!("connection reset while completing archive job");
        }

        let job_idx = state
            .jobs
            .iter()
            .position(|j| j.id == job_id && j.status == ArchiveJobStatus::Processing)
            .ok_or_else(|| archive_job::transition_error(job_id, ArchiveJobStatus::Completed))?;

        let snapshot = &mut state.snapshots[snapshot_idx];
        snapshot.status = SnapshotStatus::Completed;
        snapshot.updated_at = chrono::Utc::now();
        let snapshot = snapshot.clone();

        let job = &mut state.jobs[job_idx];
        job.status = ArchiveJobStatus::Completed;

        Ok((job.clone(), snapshot))
    }

    async fn fail_snapshot(&self, id: SnapshotId, error: &str) -> Result<Snapshot> {
        let mut state = lock(&self.state);
        let snapshot = state
            .snapshots
            .iter_mut()
            .find(|s| s.id == id && s.status == SnapshotStatus::Processing)
            .ok_or_else(|| snapshot::transition_error(id, SnapshotStatus::Failed))?;

        snapshot.status = SnapshotStatus::Failed;
        snapshot.error = Some(error.to_string());
        snapshot.updated_at = chrono::Utc::now();
        Ok(snapshot.clone())
    }

    async fn fail_job(&self, id: ArchiveJobId, error: &str) -> Result<ArchiveJob> {
        let mut state = lock(&self.state);
        let job = state
            .jobs
            .iter_mut()
            .find(|j| j.id == id && j.status == ArchiveJobStatus::Processing)
            .ok_or_else(|| archive_job::transition_error(id, ArchiveJobStatus::Failed))?;

        job.status = ArchiveJobStatus::Failed;
        job.error = Some(error.to_string());
        Ok(job.clone())
    }

    async fn link_snapshot(&self, website_id: WebsiteId, snapshot_id: SnapshotId) -> Result<bool> {
        let mut state = lock(&self.state);

        let website_exists = state.websites.iter().any(|w| w.id == website_id);
        let completed = state
            .snapshots
            .iter()
            .any(|s| s.id == snapshot_id && s.status == SnapshotStatus::Completed);
        let already_linked = state.links.contains(&(website_id, snapshot_id));

        if !website_exists || !completed || already_linked {
            return Ok(false);
        }

        state.links.push((website_id, snapshot_id));
        if let Some(website) = state.websites.iter_mut().find(|w| w.id == website_id) {
            website.updated_at = chrono::Utc::now();
        }
        Ok(true)
    }
}
