//! Job lifecycle management
//!
//! Job rows live in the `jobs` namespace and move strictly forward through
//! the status machine. All writes here are merge-updates of the existing
//! row; the terminal guards make duplicate event deliveries harmless: a
//! job that is already `completed` or `failed` is never re-terminalized.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::debug;

use crate::models::{ExtractionRecord, FailureStage, Job, JobStatus, ScrapeOptions};
use crate::state::{ns, State};

/// Sync-mode polling interval
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Sync-mode polling deadline
pub const POLL_TIMEOUT: Duration = Duration::from_secs(30);

/// Build a fresh job row in `queued`
pub fn new_job(job_id: &str, scraper_id: &str, url: &str, options: ScrapeOptions) -> Job {
    Job {
        job_id: job_id.to_string(),
        scraper_id: scraper_id.to_string(),
        url: url.to_string(),
        status: JobStatus::Queued,
        options,
        created_at: Utc::now(),
        updated_at: None,
        completed_at: None,
        failed_at: None,
        error: None,
        stage: None,
    }
}

/// Advance a job to a non-terminal status (merge-update)
///
/// Refuses to touch a terminal row and never moves status backwards.
pub async fn update_status(state: &State, job_id: &str, status: JobStatus) -> Result<()> {
    let Some(mut job) = state.get::<Job>(ns::JOBS, job_id).await? else {
        return Ok(());
    };

    if job.status.is_terminal() || status <= job.status {
        debug!(job_id, current = job.status.as_str(), requested = status.as_str(),
            "Skipping status update");
        return Ok(());
    }

    job.status = status;
    job.updated_at = Some(Utc::now());
    state.set(ns::JOBS, job_id, &job).await
}

/// Terminal write: mark a job completed
///
/// Returns `false` without writing when the job is already terminal, so
/// duplicate `extraction.completed` deliveries leave the row untouched.
pub async fn mark_completed(
    state: &State,
    job_id: &str,
    completed_at: DateTime<Utc>,
) -> Result<bool> {
    let Some(mut job) = state.get::<Job>(ns::JOBS, job_id).await? else {
        return Ok(false);
    };

    if job.status.is_terminal() {
        debug!(job_id, status = job.status.as_str(), "Job already terminal");
        return Ok(false);
    }

    job.status = JobStatus::Completed;
    job.completed_at = Some(completed_at);
    job.updated_at = Some(completed_at);
    state.set(ns::JOBS, job_id, &job).await?;
    Ok(true)
}

/// Terminal write: mark a job failed
///
/// Returns `false` without writing when the job is already terminal — in
/// particular, a late duplicate `extraction.failed` must leave a
/// `completed` job alone.
pub async fn mark_failed(
    state: &State,
    job_id: &str,
    error: &str,
    stage: FailureStage,
    url: Option<&str>,
) -> Result<bool> {
    let Some(mut job) = state.get::<Job>(ns::JOBS, job_id).await? else {
        return Ok(false);
    };

    if job.status.is_terminal() {
        debug!(job_id, status = job.status.as_str(), "Job already terminal, leaving alone");
        return Ok(false);
    }

    let failed_at = Utc::now();
    job.status = JobStatus::Failed;
    job.error = Some(error.to_string());
    job.stage = Some(stage);
    job.failed_at = Some(failed_at);
    job.updated_at = Some(failed_at);
    if let Some(url) = url {
        job.url = url.to_string();
    }
    state.set(ns::JOBS, job_id, &job).await?;
    Ok(true)
}

/// Poll for a terminal state in sync mode
///
/// Sleeps 500 ms between reads, bounded by `timeout`. On `completed`
/// returns the `extractions` row; on `failed` a synthetic failed record;
/// on timeout `None` (the job keeps running in the background).
pub async fn poll_for_completion(
    state: &State,
    job_id: &str,
    timeout: Duration,
) -> Option<ExtractionRecord> {
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        if tokio::time::Instant::now() >= deadline {
            return None;
        }

        if let Ok(Some(job)) = state.get::<Job>(ns::JOBS, job_id).await {
            match job.status {
                JobStatus::Completed => {
                    if let Ok(Some(record)) =
                        state.get::<ExtractionRecord>(ns::EXTRACTIONS, job_id).await
                    {
                        return Some(record);
                    }
                    // Terminal but the result row is not visible yet; keep polling
                }
                JobStatus::Failed => {
                    return Some(ExtractionRecord {
                        job_id: job_id.to_string(),
                        status: JobStatus::Failed,
                        data: None,
                        url: Some(job.url),
                        schema: None,
                        scraper_id: Some(job.scraper_id),
                        completed_at: None,
                        failed_at: job.failed_at,
                        model: None,
                        usage: None,
                        cached: false,
                        metadata: None,
                        error: job.error.or_else(|| Some("Extraction failed".to_string())),
                        stage: job.stage,
                        validation_errors: None,
                    });
                }
                _ => {}
            }
        }

        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Schema;
    use serde_json::json;

    async fn seeded_state() -> State {
        let state = State::in_memory();
        let job = new_job("job_1", "scr_1", "https://x/a", ScrapeOptions::default());
        state.set(ns::JOBS, "job_1", &job).await.unwrap();
        state
    }

    #[tokio::test]
    async fn test_status_moves_forward_only() {
        let state = seeded_state().await;

        update_status(&state, "job_1", JobStatus::Fetching).await.unwrap();
        update_status(&state, "job_1", JobStatus::Extracting).await.unwrap();
        // Regression attempt is ignored
        update_status(&state, "job_1", JobStatus::Fetching).await.unwrap();

        let job: Job = state.get(ns::JOBS, "job_1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Extracting);
    }

    #[tokio::test]
    async fn test_mark_completed_once() {
        let state = seeded_state().await;
        let now = Utc::now();

        assert!(mark_completed(&state, "job_1", now).await.unwrap());
        assert!(!mark_completed(&state, "job_1", now).await.unwrap());

        let job: Job = state.get(ns::JOBS, "job_1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.completed_at, Some(now));
    }

    #[tokio::test]
    async fn test_failed_does_not_overwrite_completed() {
        let state = seeded_state().await;
        mark_completed(&state, "job_1", Utc::now()).await.unwrap();

        let wrote = mark_failed(&state, "job_1", "late failure", FailureStage::Storing, None)
            .await
            .unwrap();
        assert!(!wrote);

        let job: Job = state.get(ns::JOBS, "job_1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.error.is_none());
    }

    #[tokio::test]
    async fn test_completed_does_not_overwrite_failed() {
        let state = seeded_state().await;
        mark_failed(&state, "job_1", "boom", FailureStage::Fetching, None)
            .await
            .unwrap();

        assert!(!mark_completed(&state, "job_1", Utc::now()).await.unwrap());

        let job: Job = state.get(ns::JOBS, "job_1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("boom"));
        assert_eq!(job.stage, Some(FailureStage::Fetching));
    }

    #[tokio::test]
    async fn test_update_on_missing_job_is_noop() {
        let state = State::in_memory();
        update_status(&state, "job_missing", JobStatus::Fetching).await.unwrap();
        assert!(!mark_completed(&state, "job_missing", Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn test_poll_returns_completed_record() {
        let state = seeded_state().await;

        let record = ExtractionRecord {
            job_id: "job_1".to_string(),
            status: JobStatus::Completed,
            data: Some(json!({"title": "Hello"})),
            url: Some("https://x/a".to_string()),
            schema: Some(Schema::Prompt("t".to_string())),
            scraper_id: Some("scr_1".to_string()),
            completed_at: Some(Utc::now()),
            failed_at: None,
            model: None,
            usage: None,
            cached: false,
            metadata: None,
            error: None,
            stage: None,
            validation_errors: None,
        };
        state.set(ns::EXTRACTIONS, "job_1", &record).await.unwrap();
        mark_completed(&state, "job_1", Utc::now()).await.unwrap();

        let polled = poll_for_completion(&state, "job_1", Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(polled.status, JobStatus::Completed);
        assert_eq!(polled.data.unwrap()["title"], "Hello");
    }

    #[tokio::test]
    async fn test_poll_times_out_on_stuck_job() {
        let state = seeded_state().await;
        let polled = poll_for_completion(&state, "job_1", Duration::from_millis(50)).await;
        assert!(polled.is_none());
    }
}
