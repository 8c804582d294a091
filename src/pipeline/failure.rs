//! Failure handler
//!
//! Consumes `extraction.failed` and makes the failure visible everywhere a
//! client might look: the job row, the `extractions` record, and the
//! progress stream. Emits nothing and never raises — anything that goes
//! wrong in here is logged and dropped.
//!
//! A job that already completed is left entirely alone; a late or
//! duplicate failure event must not re-terminalize it.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::bus::{Event, EventBus, EventHandler, ExtractionFailed, Topic};
use crate::job;
use crate::models::{ExtractionRecord, Job, JobStatus};
use crate::progress::ProgressStream;
use crate::state::{ns, State};

pub struct FailureHandler {
    state: State,
    progress: Arc<ProgressStream>,
}

impl FailureHandler {
    pub fn new(state: State, progress: Arc<ProgressStream>) -> Self {
        Self { state, progress }
    }

    async fn process(&self, envelope: ExtractionFailed) {
        let job_id = envelope.job_id.as_str();

        error!(
            job_id,
            stage = envelope.stage.as_str(),
            error = %truncate(&envelope.error, 200),
            "Extraction failed"
        );

        // Terminal guard: never unseat a finished job
        match self.state.get::<Job>(ns::JOBS, job_id).await {
            Ok(Some(job)) if job.status.is_terminal() => {
                debug!(job_id, status = job.status.as_str(), "Job already terminal, leaving alone");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(job_id, error = %e, "Failed to read job row");
            }
        }

        if let Err(e) = job::mark_failed(
            &self.state,
            job_id,
            &envelope.error,
            envelope.stage,
            envelope.url.as_deref(),
        )
        .await
        {
            error!(job_id, error = %e, "Failed to store failed job status");
        }

        let record = ExtractionRecord {
            job_id: job_id.to_string(),
            status: JobStatus::Failed,
            data: None,
            url: envelope.url.clone(),
            schema: None,
            scraper_id: None,
            completed_at: None,
            failed_at: Some(Utc::now()),
            model: None,
            usage: None,
            cached: false,
            metadata: None,
            error: Some(envelope.error.clone()),
            stage: Some(envelope.stage),
            validation_errors: envelope.validation_errors.clone(),
        };
        if let Err(e) = self.state.set(ns::EXTRACTIONS, job_id, &record).await {
            error!(job_id, error = %e, "Failed to store error record");
        }

        let message = format!(
            "[{}] {}",
            envelope.stage.as_str(),
            truncate(&envelope.error, 100)
        );
        self.progress
            .update(
                job_id,
                JobStatus::Failed,
                envelope.stage.progress_percent(),
                Some(&message),
            )
            .await;

        debug!(job_id, "Error handling completed");
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[async_trait]
impl EventHandler for FailureHandler {
    fn name(&self) -> &'static str {
        "failure"
    }

    fn topic(&self) -> Topic {
        Topic::ExtractionFailed
    }

    async fn handle(&self, event: Event, _bus: Arc<EventBus>) -> anyhow::Result<()> {
        let envelope: ExtractionFailed = match serde_json::from_value(event.data) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Dropping malformed extraction.failed envelope");
                return Ok(());
            }
        };

        self.process(envelope).await;
        Ok(())
    }
}
