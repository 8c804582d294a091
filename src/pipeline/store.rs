//! Store stage
//!
//! Consumes `extraction.completed`. Validates structured results against
//! their schema (collecting every violation), writes the terminal
//! `extractions` row, marks the job completed, refreshes the extraction
//! cache, and cleans up the side tables. `results.stored` only fires after
//! the terminal write is durable.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{emit_failure, StageFailure};
use crate::bus::{
    CacheType, Event, EventBus, EventHandler, ExtractionCompleted, ResultsStored, Topic,
};
use crate::cache::CacheLayer;
use crate::job;
use crate::models::{ExtractionPayload, ExtractionRecord, FailureStage, Job, JobStatus};
use crate::progress::ProgressStream;
use crate::state::{ns, State};
use crate::validator;

pub struct StoreStage {
    state: State,
    cache: CacheLayer,
    progress: Arc<ProgressStream>,
}

impl StoreStage {
    pub fn new(state: State, cache: CacheLayer, progress: Arc<ProgressStream>) -> Self {
        Self {
            state,
            cache,
            progress,
        }
    }

    async fn process(
        &self,
        envelope: ExtractionCompleted,
        bus: &Arc<EventBus>,
    ) -> Result<(), StageFailure> {
        let job_id = envelope.job_id.as_str();
        let url = envelope.url.as_str();

        // Duplicate delivery after a completed store: leave everything as is
        if let Ok(Some(job)) = self.state.get::<Job>(ns::JOBS, job_id).await {
            if job.status == JobStatus::Completed {
                debug!(job_id, "Job already completed, ignoring duplicate delivery");
                return Ok(());
            }
        }

        let payload: Option<ExtractionPayload> = self
            .state
            .get(ns::EXTRACTION_PAYLOADS, job_id)
            .await
            .map_err(|e| StageFailure::new(format!("Unexpected error: {e}"), Some(url)))?;
        let Some(payload) = payload else {
            return Err(StageFailure::new(
                "Extraction payload not found in state",
                Some(url),
            ));
        };

        if payload.data.is_null()
            || payload.data.as_object().map(|o| o.is_empty()).unwrap_or(false)
        {
            return Err(StageFailure::new("data is required", Some(url)));
        }
        if !payload.data.is_object() {
            return Err(StageFailure::new(
                format!("data must be an object, got {}", json_type(&payload.data)),
                Some(url),
            ));
        }

        info!(job_id, url, cached = envelope.cached, "Storing extraction results");

        let _ = job::update_status(&self.state, job_id, JobStatus::Validating).await;
        self.progress
            .update(job_id, JobStatus::Validating, 90, Some("Validating results..."))
            .await;

        // Only structured schemas validate; prompts skip this step
        if let Some(schema) = payload.schema.as_structured() {
            if let Err(errors) = validator::validate(&payload.data, schema) {
                warn!(job_id, error_count = errors.len(), "Validation failed");
                return Err(
                    StageFailure::new(validator::summarize(&errors), Some(url))
                        .with_validation_errors(errors),
                );
            }
        }

        let completed_at = Utc::now();
        let record = ExtractionRecord {
            job_id: job_id.to_string(),
            status: JobStatus::Completed,
            data: Some(payload.data.clone()),
            url: Some(envelope.url.clone()),
            schema: Some(payload.schema.clone()),
            scraper_id: Some(envelope.scraper_id.clone()),
            completed_at: Some(completed_at),
            failed_at: None,
            model: payload.model.clone(),
            usage: Some(payload.usage.clone()),
            cached: envelope.cached,
            metadata: Some(payload.metadata.clone()),
            error: None,
            stage: None,
            validation_errors: None,
        };

        self.state
            .set(ns::EXTRACTIONS, job_id, &record)
            .await
            .map_err(|e| StageFailure::new(format!("Unexpected error: {e}"), Some(url)))?;

        if let Err(e) = job::mark_completed(&self.state, job_id, completed_at).await {
            warn!(job_id, error = %e, "Failed to update job status");
        }

        // Feed the fast path — unless this job was itself served from the
        // extraction cache
        let from_extraction_cache =
            envelope.cached && envelope.cache_type == Some(CacheType::Extraction);
        if !from_extraction_cache {
            let cached_ok = self
                .cache
                .put_extraction(
                    &envelope.url,
                    &payload.schema,
                    &payload.data,
                    payload.model.as_deref(),
                    Some(&envelope.scraper_id),
                    &payload.metadata,
                )
                .await;
            if cached_ok {
                info!(job_id, url, "Extraction cached for future use");
            }
        }

        // Best-effort side-table cleanup; this stage owns all three rows
        for group in [ns::EXTRACTION_PAYLOADS, ns::JOB_PAYLOADS, ns::FETCH_PAYLOADS] {
            if let Err(e) = self.state.delete(group, job_id).await {
                warn!(job_id, group, error = %e, "Side-table cleanup failed");
            }
        }

        self.progress
            .update(job_id, JobStatus::Completed, 100, Some("Extraction completed"))
            .await;

        let stored = ResultsStored {
            job_id: job_id.to_string(),
            url: envelope.url.clone(),
            scraper_id: envelope.scraper_id.clone(),
            completed_at: completed_at.to_rfc3339(),
            cached: envelope.cached,
        };
        bus.publish(&stored, job_id)
            .await
            .map_err(|e| StageFailure::new(format!("Unexpected error: {e}"), Some(url)))?;

        info!(job_id, url, "Store completed");
        Ok(())
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[async_trait]
impl EventHandler for StoreStage {
    fn name(&self) -> &'static str {
        "store"
    }

    fn topic(&self) -> Topic {
        Topic::ExtractionCompleted
    }

    async fn handle(&self, event: Event, bus: Arc<EventBus>) -> anyhow::Result<()> {
        let envelope: ExtractionCompleted = match serde_json::from_value(event.data) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Dropping malformed extraction.completed envelope");
                return Ok(());
            }
        };

        let job_id = envelope.job_id.clone();
        if let Err(failure) = self.process(envelope, &bus).await {
            emit_failure(&bus, &job_id, FailureStage::Storing, failure).await;
        }
        Ok(())
    }
}
