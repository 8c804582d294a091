//! Pipeline stages
//!
//! Four event handlers move a job through the dataflow:
//!
//! ```text
//! extraction.requested → Fetch → webpage.fetched → Extract
//!     → extraction.completed → Store → results.stored
//! ```
//!
//! Any stage can emit `extraction.failed`, consumed by the failure handler.
//! Every stage assumes at-least-once delivery: duplicates must leave the
//! stored result identical. Events carry minimal envelopes; page content
//! and schemas travel through the state-store side tables keyed by
//! `job_id`.

use std::sync::Arc;
use tracing::error;

pub mod extract;
pub mod failure;
pub mod fetch;
pub mod store;

pub use extract::ExtractStage;
pub use failure::FailureHandler;
pub use fetch::FetchStage;
pub use store::StoreStage;

use crate::bus::{EventBus, ExtractionFailed};
use crate::cache::CacheLayer;
use crate::extractor::LlmClient;
use crate::models::FailureStage;
use crate::progress::ProgressStream;
use crate::scrape::{FirecrawlScraper, SimpleScraper};
use crate::state::State;

/// A producing failure inside a stage, about to become `extraction.failed`
#[derive(Debug)]
pub(crate) struct StageFailure {
    pub error: String,
    pub url: Option<String>,
    pub validation_errors: Option<Vec<String>>,
}

impl StageFailure {
    pub fn new(error: impl Into<String>, url: Option<&str>) -> Self {
        Self {
            error: error.into(),
            url: url.map(str::to_string),
            validation_errors: None,
        }
    }

    pub fn with_validation_errors(mut self, errors: Vec<String>) -> Self {
        self.validation_errors = Some(errors);
        self
    }
}

/// Publish `extraction.failed` for a job, exactly once per delivery
pub(crate) async fn emit_failure(
    bus: &Arc<EventBus>,
    job_id: &str,
    stage: FailureStage,
    failure: StageFailure,
) {
    error!(
        job_id,
        stage = stage.as_str(),
        error = %failure.error,
        "Stage failed"
    );

    let envelope = ExtractionFailed {
        job_id: job_id.to_string(),
        error: failure.error,
        stage,
        url: failure.url,
        validation_errors: failure.validation_errors,
    };

    if let Err(e) = bus.publish(&envelope, job_id).await {
        error!(job_id, error = %e, "Failed to publish extraction.failed");
    }
}

/// Everything the stages need, bundled for wiring
pub struct StageContext {
    pub state: State,
    pub cache: CacheLayer,
    pub progress: Arc<ProgressStream>,
    pub firecrawl: Arc<FirecrawlScraper>,
    pub simple: Arc<SimpleScraper>,
    pub llm: Arc<LlmClient>,
}

/// Subscribe all four stages to the bus
pub async fn register_stages(bus: &Arc<EventBus>, ctx: StageContext) {
    bus.subscribe(Arc::new(FetchStage::new(
        ctx.state.clone(),
        ctx.cache.clone(),
        Arc::clone(&ctx.progress),
        Arc::clone(&ctx.firecrawl),
        Arc::clone(&ctx.simple),
    )))
    .await;

    bus.subscribe(Arc::new(ExtractStage::new(
        ctx.state.clone(),
        Arc::clone(&ctx.progress),
        Arc::clone(&ctx.llm),
    )))
    .await;

    bus.subscribe(Arc::new(StoreStage::new(
        ctx.state.clone(),
        ctx.cache.clone(),
        Arc::clone(&ctx.progress),
    )))
    .await;

    bus.subscribe(Arc::new(FailureHandler::new(
        ctx.state.clone(),
        Arc::clone(&ctx.progress),
    )))
    .await;
}
