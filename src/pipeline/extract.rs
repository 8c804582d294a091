//! Extract stage
//!
//! Consumes `webpage.fetched`, pulls the markdown and schema out of
//! `fetch_payloads/<job_id>`, and asks the LLM for data matching the
//! schema. The parsed result lands in `extraction_payloads/<job_id>`.
//!
//! The fetch payload is NOT cleaned up here: the Store stage owns that
//! row's deletion, so a duplicate `webpage.fetched` delivery can still
//! re-run this stage.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use super::{emit_failure, StageFailure};
use crate::bus::{
    Event, EventBus, EventHandler, ExtractionCompleted, Topic, WebpageFetched,
};
use crate::extractor::{LlmClient, DEFAULT_MODEL};
use crate::job;
use crate::models::{ExtractionPayload, FailureStage, FetchPayload, JobStatus};
use crate::progress::ProgressStream;
use crate::state::{ns, State};

pub struct ExtractStage {
    state: State,
    progress: Arc<ProgressStream>,
    llm: Arc<LlmClient>,
}

impl ExtractStage {
    pub fn new(state: State, progress: Arc<ProgressStream>, llm: Arc<LlmClient>) -> Self {
        Self {
            state,
            progress,
            llm,
        }
    }

    async fn process(
        &self,
        envelope: WebpageFetched,
        bus: &Arc<EventBus>,
    ) -> Result<(), StageFailure> {
        let job_id = envelope.job_id.as_str();
        let url = envelope.url.as_str();

        let payload: Option<FetchPayload> = self
            .state
            .get(ns::FETCH_PAYLOADS, job_id)
            .await
            .map_err(|e| StageFailure::new(format!("Unexpected error: {e}"), Some(url)))?;
        let Some(payload) = payload else {
            return Err(StageFailure::new("Fetch payload not found in state", Some(url)));
        };

        let markdown = payload.markdown.trim();
        if markdown.is_empty() {
            return Err(StageFailure::new("markdown is required", Some(url)));
        }

        let model = envelope.options.model.as_deref().unwrap_or(DEFAULT_MODEL);
        info!(job_id, model, content_length = markdown.len(), "Extracting with LLM");

        let _ = job::update_status(&self.state, job_id, JobStatus::Extracting).await;
        self.progress
            .update(
                job_id,
                JobStatus::Extracting,
                60,
                Some(&format!("Extracting with {model}...")),
            )
            .await;

        let extraction = self
            .llm
            .extract(markdown, &payload.schema, envelope.options.model.as_deref())
            .await
            .map_err(|e| StageFailure::new(format!("Extraction failed: {e}"), Some(url)))?;

        let is_empty = extraction.data.is_null()
            || extraction
                .data
                .as_object()
                .map(|o| o.is_empty())
                .unwrap_or(false);
        if is_empty {
            return Err(StageFailure::new("Extraction returned empty data", Some(url)));
        }

        let stored = ExtractionPayload {
            data: extraction.data,
            schema: payload.schema,
            model: Some(extraction.model.clone()),
            usage: extraction.usage,
            metadata: payload.metadata,
        };
        self.state
            .set(ns::EXTRACTION_PAYLOADS, job_id, &stored)
            .await
            .map_err(|e| StageFailure::new(format!("Unexpected error: {e}"), Some(url)))?;

        let _ = job::update_status(&self.state, job_id, JobStatus::Extracted).await;
        self.progress
            .update(job_id, JobStatus::Extracted, 80, Some("Data extracted"))
            .await;

        let completed = ExtractionCompleted {
            job_id: job_id.to_string(),
            url: envelope.url.clone(),
            scraper_id: envelope.scraper_id.clone(),
            cached: envelope.cached,
            cache_type: envelope.cache_type,
        };
        bus.publish(&completed, job_id)
            .await
            .map_err(|e| StageFailure::new(format!("Unexpected error: {e}"), Some(url)))?;

        info!(job_id, model = %extraction.model, "Extraction completed");
        Ok(())
    }
}

#[async_trait]
impl EventHandler for ExtractStage {
    fn name(&self) -> &'static str {
        "extract"
    }

    fn topic(&self) -> Topic {
        Topic::WebpageFetched
    }

    async fn handle(&self, event: Event, bus: Arc<EventBus>) -> anyhow::Result<()> {
        let envelope: WebpageFetched = match serde_json::from_value(event.data) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Dropping malformed webpage.fetched envelope");
                return Ok(());
            }
        };

        let job_id = envelope.job_id.clone();
        if let Err(failure) = self.process(envelope, &bus).await {
            emit_failure(&bus, &job_id, FailureStage::Extracting, failure).await;
        }
        Ok(())
    }
}
