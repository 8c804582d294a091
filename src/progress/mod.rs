//! Per-job progress stream
//!
//! One entry per `job_id`, last write wins. Stages push updates as the job
//! moves through the pipeline; the status endpoint reads the latest entry
//! and clients can subscribe to the live feed. Progress writes are
//! advisory — a failed update never fails a job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};

use crate::models::JobStatus;

/// One progress update for one job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobProgress {
    pub id: String,
    pub status: JobStatus,
    pub percent: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Last-write-wins progress map with a broadcast feed
pub struct ProgressStream {
    latest: RwLock<HashMap<String, JobProgress>>,
    feed: broadcast::Sender<JobProgress>,
}

impl Default for ProgressStream {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressStream {
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(256);
        Self {
            latest: RwLock::new(HashMap::new()),
            feed,
        }
    }

    /// Record an update for a job. Never fails.
    pub async fn update(
        &self,
        job_id: &str,
        status: JobStatus,
        percent: u8,
        message: Option<&str>,
    ) {
        let entry = JobProgress {
            id: job_id.to_string(),
            status,
            percent: percent.min(100),
            message: message.map(str::to_string),
            timestamp: Utc::now(),
        };

        self.latest
            .write()
            .await
            .insert(job_id.to_string(), entry.clone());

        // No subscribers is fine
        let _ = self.feed.send(entry);
    }

    /// Latest entry for a job
    pub async fn get(&self, job_id: &str) -> Option<JobProgress> {
        self.latest.read().await.get(job_id).cloned()
    }

    /// Subscribe to the live feed (all jobs; filter by `id` client-side)
    pub fn subscribe(&self) -> broadcast::Receiver<JobProgress> {
        self.feed.subscribe()
    }
}
