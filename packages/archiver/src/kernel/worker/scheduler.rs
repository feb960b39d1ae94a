//! Polling loop around `ArchiveWorker`.
//!
//! Every tick claims and processes at most one job. Unlike a fixed-interval
//! tick, the next claim happens immediately when a job was found, so a
//! backlog drains without waiting out the interval between jobs. Only an
//! empty queue or a store error waits for the poll interval. Shutdown stops
//! new claims but lets the in-flight job finish.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::ArchiveWorker;
use crate::domains::jobs::models::ArchiveJob;

pub struct ArchiveScheduler {
    worker: Arc<ArchiveWorker>,
    poll_interval: Duration,
    shutdown: CancellationToken,
}

impl ArchiveScheduler {
    pub fn new(worker: Arc<ArchiveWorker>, poll_interval: Duration) -> Self {
        Self {
            worker,
            poll_interval,
            shutdown: CancellationToken::new(),
        }
    }

    /// Spawn the polling loop on the current runtime.
    pub fn start(&self) -> JoinHandle<()> {
        let worker = Arc::clone(&self.worker);
        let shutdown = self.shutdown.clone();
        let poll_interval = self.poll_interval;

        tokio::spawn(async move {
            info!(poll_interval_secs = poll_interval.as_secs_f64(), "archive worker starting");

            loop {
                if shutdown.is_cancelled() {
                    break;
                }

                // Not raced against shutdown: an in-flight job always finishes
                let found = match worker.process_next_job().await {
                    Ok(job) => job.is_some(),
                    Err(e) => {
                        error!(error = %format!("{:#}", e), "archive worker iteration failed");
                        false
                    }
                };

                if found {
                    continue;
                }

                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }

            info!("archive worker stopped");
        })
    }

    /// Stop claiming jobs. The task returned by `start` exits once the
    /// current job (if any) is finished.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Process a single job without the loop.
    pub async fn run_once(&self) -> Result<Option<ArchiveJob>> {
        self.worker.process_next_job().await
    }
}
