//! Fetch stage
//!
//! Consumes `extraction.requested`. Checks the extraction cache first (a
//! hit short-circuits straight to `extraction.completed`), then the
//! content cache, then scrapes through the configured back-end and reduces
//! the page to markdown. Content lands in `fetch_payloads/<job_id>`; the
//! `webpage.fetched` envelope carries only sizes and flags.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{emit_failure, StageFailure};
use crate::bus::{
    CacheType, Event, EventBus, EventHandler, ExtractionCompleted, ExtractionRequested, Topic,
    WebpageFetched,
};
use crate::cache::CacheLayer;
use crate::cleaner;
use crate::job;
use crate::models::{
    ExtractionPayload, FailureStage, FetchPayload, JobPayload, JobStatus, ScrapeOptions,
};
use crate::progress::ProgressStream;
use crate::scrape::{FirecrawlScraper, ScrapedPage, SimpleScraper};
use crate::state::{ns, State};

pub struct FetchStage {
    state: State,
    cache: CacheLayer,
    progress: Arc<ProgressStream>,
    firecrawl: Arc<FirecrawlScraper>,
    simple: Arc<SimpleScraper>,
}

impl FetchStage {
    pub fn new(
        state: State,
        cache: CacheLayer,
        progress: Arc<ProgressStream>,
        firecrawl: Arc<FirecrawlScraper>,
        simple: Arc<SimpleScraper>,
    ) -> Self {
        Self {
            state,
            cache,
            progress,
            firecrawl,
            simple,
        }
    }

    async fn process(
        &self,
        envelope: ExtractionRequested,
        bus: &Arc<EventBus>,
    ) -> Result<(), StageFailure> {
        let job_id = envelope.job_id.as_str();
        let url = envelope.url.trim();
        let options = &envelope.options;

        if url.is_empty() {
            return Err(StageFailure::new("url is required", None));
        }

        // Schema comes from the side table, not the envelope
        let payload: Option<JobPayload> = self
            .state
            .get(ns::JOB_PAYLOADS, job_id)
            .await
            .map_err(|e| StageFailure::new(format!("Unexpected error: {e}"), Some(url)))?;
        let Some(payload) = payload else {
            return Err(StageFailure::new("Job payload not found in state", Some(url)));
        };
        let schema = payload.schema;

        info!(job_id, url, use_cache = options.use_cache, "Processing extraction request");

        let _ = job::update_status(&self.state, job_id, JobStatus::Fetching).await;

        // Extraction cache: skip the scrape AND the LLM
        if options.use_cache {
            if let Some(entry) = self.cache.get_extraction(url, &schema).await {
                info!(job_id, url, "Extraction cache hit, skipping scrape and LLM");

                self.progress
                    .update(job_id, JobStatus::Completed, 100, Some("Using cached result"))
                    .await;

                let stored = ExtractionPayload {
                    data: entry.data,
                    schema,
                    model: entry.model,
                    usage: serde_json::Value::Object(Default::default()),
                    metadata: entry.metadata,
                };
                self.state
                    .set(ns::EXTRACTION_PAYLOADS, job_id, &stored)
                    .await
                    .map_err(|e| StageFailure::new(format!("Unexpected error: {e}"), Some(url)))?;

                let completed = ExtractionCompleted {
                    job_id: job_id.to_string(),
                    url: url.to_string(),
                    scraper_id: envelope.scraper_id.clone(),
                    cached: true,
                    cache_type: Some(CacheType::Extraction),
                };
                bus.publish(&completed, job_id)
                    .await
                    .map_err(|e| StageFailure::new(format!("Unexpected error: {e}"), Some(url)))?;
                return Ok(());
            }
        }

        self.progress
            .update(job_id, JobStatus::Fetching, 20, Some("Fetching webpage..."))
            .await;

        // Content cache: skip the scrape only
        let mut markdown = None;
        let mut metadata = serde_json::Value::Object(Default::default());
        let mut content_cached = false;

        if options.use_cache {
            if let Some(entry) = self.cache.get_content(url).await {
                info!(job_id, url, "Content cache hit, skipping scrape");
                markdown = Some(entry.markdown);
                metadata = entry.metadata;
                content_cached = true;
            }
        }

        let markdown = match markdown {
            Some(markdown) => markdown,
            None => {
                let (fresh, fresh_metadata) = self.scrape(job_id, url, options).await?;
                metadata = fresh_metadata;

                // Best-effort: a cache write failure never fails the job
                if !self.cache.put_content(url, &fresh, &metadata).await {
                    debug!(job_id, url, "Content cache write skipped");
                }

                fresh
            }
        };

        let fetch_payload = FetchPayload {
            markdown: markdown.clone(),
            schema,
            metadata,
        };
        self.state
            .set(ns::FETCH_PAYLOADS, job_id, &fetch_payload)
            .await
            .map_err(|e| StageFailure::new(format!("Unexpected error: {e}"), Some(url)))?;

        let _ = job::update_status(&self.state, job_id, JobStatus::Fetched).await;
        self.progress
            .update(job_id, JobStatus::Fetched, 40, Some("Content fetched, extracting..."))
            .await;

        let fetched = WebpageFetched {
            job_id: job_id.to_string(),
            url: url.to_string(),
            scraper_id: envelope.scraper_id.clone(),
            options: options.clone(),
            cached: content_cached,
            cache_type: content_cached.then_some(CacheType::Content),
            markdown_length: markdown.len(),
        };
        bus.publish(&fetched, job_id)
            .await
            .map_err(|e| StageFailure::new(format!("Unexpected error: {e}"), Some(url)))?;

        info!(job_id, content_cached, markdown_length = markdown.len(), "Fetch completed");
        Ok(())
    }

    /// Scrape through the selected back-end and reduce to markdown
    async fn scrape(
        &self,
        job_id: &str,
        url: &str,
        options: &ScrapeOptions,
    ) -> Result<(String, serde_json::Value), StageFailure> {
        let backend = if options.use_simple_scraper { "simple" } else { "firecrawl" };
        info!(job_id, scraper = backend, "Scraping webpage");

        let page: ScrapedPage = if options.use_simple_scraper {
            self.simple
                .scrape(url, options.timeout / 1000)
                .await
                .map_err(|e| StageFailure::new(format!("Scraping failed: {e}"), Some(url)))?
        } else {
            self.firecrawl
                .scrape(url, options)
                .await
                .map_err(|e| StageFailure::new(format!("Scraping failed: {e}"), Some(url)))?
        };

        let markdown = match page.markdown {
            Some(markdown) => markdown,
            None => cleaner::to_markdown(&page.html),
        };

        if markdown.trim().is_empty() {
            return Err(StageFailure::new("Empty content after conversion", Some(url)));
        }

        // Prefer provider metadata; derive it locally otherwise
        let metadata = if page.metadata.as_object().map(|o| !o.is_empty()).unwrap_or(false) {
            page.metadata
        } else {
            cleaner::page_metadata(&page.html)
        };

        Ok((markdown, metadata))
    }
}

#[async_trait]
impl EventHandler for FetchStage {
    fn name(&self) -> &'static str {
        "fetch"
    }

    fn topic(&self) -> Topic {
        Topic::ExtractionRequested
    }

    async fn handle(&self, event: Event, bus: Arc<EventBus>) -> anyhow::Result<()> {
        let envelope: ExtractionRequested = match serde_json::from_value(event.data) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Dropping malformed extraction.requested envelope");
                return Ok(());
            }
        };

        let job_id = envelope.job_id.clone();
        if let Err(failure) = self.process(envelope, &bus).await {
            emit_failure(&bus, &job_id, FailureStage::Fetching, failure).await;
        }
        Ok(())
    }
}
