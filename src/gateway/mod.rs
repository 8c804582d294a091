//! Sync/async gateway
//!
//! The request entry point. `run_scraper` creates a job, consults the
//! extraction cache for the sync fast path, emits the entry event, and
//! either polls for the terminal state or hands back a job token.
//! Scraper creation and the read-side endpoints live here too; the HTTP
//! framing is in [`api`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

pub mod api;

use crate::bus::{CacheType, EventBus, ExtractionRequested};
use crate::cache::CacheLayer;
use crate::job::{self, POLL_TIMEOUT};
use crate::models::{
    ExtractionRecord, JobPayload, JobStatus, Schema, ScheduleSpec, ScrapeOptions, Scraper,
};
use crate::monitor::{self, MonitorInfo};
use crate::progress::ProgressStream;
use crate::state::{ns, State};
use crate::utils::hash::{generate_job_id, generate_scraper_id};

/// Shared handles for the gateway and its HTTP surface
#[derive(Clone)]
pub struct AppState {
    pub state: State,
    pub bus: Arc<EventBus>,
    pub progress: Arc<ProgressStream>,
    pub cache: CacheLayer,
}

/// Gateway-level failures, mapped to HTTP statuses in [`api`]
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

/// Per-request options for `run_scraper`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunOptions {
    pub use_cache: Option<bool>,
    pub wait_for: Option<u64>,
    pub timeout: Option<u64>,
    pub use_simple_scraper: Option<bool>,
    pub model: Option<String>,

    /// Return 202 immediately instead of polling
    #[serde(rename = "async", default)]
    pub run_async: bool,

    /// Don't upsert a monitor for this URL even if the scraper schedules
    #[serde(default)]
    pub skip_monitoring: bool,
}

/// The three response envelopes of `run_scraper`
#[derive(Debug)]
pub enum RunOutcome {
    /// 200: terminal result available
    Completed {
        job_id: String,
        scraper_id: String,
        url: String,
        data: Value,
        cached: bool,
        cache_type: Option<CacheType>,
        cached_at: Option<DateTime<Utc>>,
        monitoring: MonitorInfo,
    },
    /// 200: the job failed
    Failed {
        job_id: String,
        scraper_id: String,
        url: String,
        error: String,
        stage: Option<crate::models::FailureStage>,
        monitoring: MonitorInfo,
    },
    /// 202: still running (async mode or sync timeout)
    Queued {
        job_id: String,
        scraper_id: String,
        status_url: String,
        results_url: String,
        message: Option<String>,
        monitoring: MonitorInfo,
    },
}

/// Execute a pre-configured scraper against a URL
pub async fn run_scraper(
    app: &AppState,
    scraper_id: &str,
    url: &str,
    request: RunOptions,
) -> Result<RunOutcome, GatewayError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(GatewayError::InvalidInput("url is required".to_string()));
    }
    if url::Url::parse(url).is_err() {
        return Err(GatewayError::InvalidInput(
            "url must be a valid absolute URL".to_string(),
        ));
    }

    let scraper: Scraper = app
        .state
        .get(ns::SCRAPERS, scraper_id)
        .await
        .map_err(GatewayError::Internal)?
        .ok_or_else(|| GatewayError::NotFound(format!("Scraper '{scraper_id}' not found")))?;

    // Merge request options over the scraper's saved options; request wins
    let saved = &scraper.options;
    let options = ScrapeOptions {
        use_cache: request.use_cache.unwrap_or(true),
        wait_for: request.wait_for.unwrap_or(saved.wait_for),
        timeout: request.timeout.unwrap_or(saved.timeout),
        use_simple_scraper: request
            .use_simple_scraper
            .unwrap_or(saved.use_simple_scraper),
        model: request.model.clone().or_else(|| saved.model.clone()),
    };

    let job_id = generate_job_id();
    let job = job::new_job(&job_id, scraper_id, url, options.clone());
    app.state
        .set(ns::JOBS, &job_id, &job)
        .await
        .map_err(GatewayError::Internal)?;

    // Sync fast path: an extraction-cache hit collapses the pipeline into
    // a single state read, no events
    if options.use_cache && !request.run_async {
        if let Some(entry) = app.cache.get_extraction(url, &scraper.schema).await {
            info!(%job_id, scraper_id, url, "Cache hit at the gateway, instant response");

            let monitoring = upsert_monitoring(app, &scraper, url, request.skip_monitoring).await;
            return Ok(RunOutcome::Completed {
                job_id,
                scraper_id: scraper_id.to_string(),
                url: url.to_string(),
                data: entry.data,
                cached: true,
                cache_type: Some(CacheType::Extraction),
                cached_at: Some(entry.cached_at),
                monitoring,
            });
        }
    }

    // The schema rides the state store, not the event
    let payload = JobPayload {
        schema: scraper.schema.clone(),
        scraper_id: scraper_id.to_string(),
    };
    app.state
        .set(ns::JOB_PAYLOADS, &job_id, &payload)
        .await
        .map_err(GatewayError::Internal)?;

    info!(%job_id, scraper_id, url, "Job created, cache miss, processing");

    // Group by job_id, NOT by url hash: grouping interactive requests by
    // url would serialize every request for a url behind an in-flight one
    // (head-of-line blocking). Each job gets its own FIFO lane.
    let envelope = ExtractionRequested {
        job_id: job_id.clone(),
        url: url.to_string(),
        scraper_id: scraper_id.to_string(),
        options,
    };
    app.bus
        .publish(&envelope, &job_id)
        .await
        .map_err(|e| GatewayError::Internal(e.into()))?;

    let monitoring = upsert_monitoring(app, &scraper, url, request.skip_monitoring).await;

    if request.run_async {
        return Ok(RunOutcome::Queued {
            job_id: job_id.clone(),
            scraper_id: scraper_id.to_string(),
            status_url: format!("/status/{job_id}"),
            results_url: format!("/results/{job_id}"),
            message: None,
            monitoring,
        });
    }

    // Sync mode: poll for the terminal state
    match job::poll_for_completion(&app.state, &job_id, POLL_TIMEOUT).await {
        Some(record) if record.status == JobStatus::Completed => Ok(RunOutcome::Completed {
            job_id,
            scraper_id: scraper_id.to_string(),
            url: url.to_string(),
            data: record.data.unwrap_or_else(|| Value::Object(Default::default())),
            cached: record.cached,
            cache_type: None,
            cached_at: None,
            monitoring,
        }),
        Some(record) => Ok(RunOutcome::Failed {
            job_id,
            scraper_id: scraper_id.to_string(),
            url: url.to_string(),
            error: record.error.unwrap_or_else(|| "Extraction failed".to_string()),
            stage: record.stage,
            monitoring,
        }),
        None => Ok(RunOutcome::Queued {
            job_id: job_id.clone(),
            scraper_id: scraper_id.to_string(),
            status_url: format!("/status/{job_id}"),
            results_url: format!("/results/{job_id}"),
            message: Some("Request timed out, processing continues in background".to_string()),
            monitoring,
        }),
    }
}

async fn upsert_monitoring(
    app: &AppState,
    scraper: &Scraper,
    url: &str,
    skip_monitoring: bool,
) -> MonitorInfo {
    if skip_monitoring {
        return MonitorInfo::none();
    }
    monitor::auto_add_to_monitoring(
        &app.state,
        &scraper.scraper_id,
        url,
        scraper.schedule_info.as_ref(),
    )
    .await
}

// ============================================================================
// Scraper creation
// ============================================================================

/// Scraper creation request body
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateScraperRequest {
    #[serde(default)]
    pub name: String,
    pub description: Option<String>,
    pub schema: Option<Schema>,
    pub example_url: Option<String>,
    pub webhook_url: Option<String>,
    pub schedule: Option<ScheduleSpec>,
    #[serde(default)]
    pub monitor_urls: Vec<String>,
    #[serde(default)]
    pub options: CreateScraperOptions,
    /// Queue one cache-warming job per monitor URL
    #[serde(default)]
    pub warm_cache: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateScraperOptions {
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub use_simple_scraper: bool,
    #[serde(default = "default_wait_for")]
    pub wait_for: u64,
}

fn default_timeout() -> u64 {
    30_000
}

fn default_wait_for() -> u64 {
    2000
}

impl Default for CreateScraperOptions {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            use_simple_scraper: false,
            wait_for: default_wait_for(),
        }
    }
}

/// Scraper creation response
#[derive(Debug, Serialize)]
pub struct ScraperCreated {
    pub scraper_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub endpoint: String,
    pub schema: Schema,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ScheduleSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitors_created: Option<usize>,
    pub created_at: DateTime<Utc>,
}

/// Validate and persist a new scraper, creating monitors for its URLs
pub async fn create_scraper(
    app: &AppState,
    request: CreateScraperRequest,
) -> Result<ScraperCreated, GatewayError> {
    let name = request.name.trim().to_string();
    if name.is_empty() {
        return Err(GatewayError::InvalidInput("name is required".to_string()));
    }

    let Some(schema) = request.schema else {
        return Err(GatewayError::InvalidInput("schema is required".to_string()));
    };
    if let Schema::Structured(value) = &schema {
        if !value.is_object() {
            return Err(GatewayError::InvalidInput(
                "schema must be string or object".to_string(),
            ));
        }
    }

    let schedule_info = match &request.schedule {
        None => None,
        Some(ScheduleSpec::Minutes(minutes)) => {
            if *minutes < 5 {
                return Err(GatewayError::InvalidInput(
                    "schedule must be at least 5 minutes".to_string(),
                ));
            }
            Some(monitor::parse_schedule(&ScheduleSpec::Minutes(*minutes)))
        }
        Some(ScheduleSpec::Cron(expr)) => {
            if !monitor::cron_is_valid(expr) {
                return Err(GatewayError::InvalidInput(format!(
                    "invalid cron expression: {expr}"
                )));
            }
            Some(monitor::parse_schedule(&ScheduleSpec::Cron(expr.clone())))
        }
    };

    let scraper_id = generate_scraper_id();
    let created_at = Utc::now();

    let scraper = Scraper {
        scraper_id: scraper_id.clone(),
        name: name.clone(),
        description: request.description.clone(),
        schema: schema.clone(),
        example_url: request.example_url.clone(),
        webhook_url: request.webhook_url.clone(),
        schedule: request.schedule.clone(),
        schedule_info: schedule_info.clone(),
        options: ScrapeOptions {
            use_cache: true,
            wait_for: request.options.wait_for,
            timeout: request.options.timeout,
            use_simple_scraper: request.options.use_simple_scraper,
            model: None,
        },
        created_at,
    };

    app.state
        .set(ns::SCRAPERS, &scraper_id, &scraper)
        .await
        .map_err(GatewayError::Internal)?;

    let mut monitors_created = None;
    if let Some(info) = &schedule_info {
        if !request.monitor_urls.is_empty() {
            let created = monitor::create_monitors_for_urls(
                &app.state,
                &scraper_id,
                &request.monitor_urls,
                info,
            )
            .await
            .map_err(GatewayError::Internal)?;
            if created > 0 {
                monitors_created = Some(created);
            }

            if request.warm_cache {
                warm_cache_jobs(app, &scraper, &request.monitor_urls).await;
            }
        }
    }

    info!(%scraper_id, %name, monitors = monitors_created.unwrap_or(0), "Scraper created");

    Ok(ScraperCreated {
        scraper_id,
        name,
        description: request.description,
        endpoint: format!("/scrape/{}", scraper.scraper_id),
        schema,
        schedule: request.schedule,
        monitors_created,
        created_at,
    })
}

/// Queue one pipeline run per URL so first reads hit a warm cache
async fn warm_cache_jobs(app: &AppState, scraper: &Scraper, urls: &[String]) {
    for url in urls {
        let url = url.trim();
        if url.is_empty() {
            continue;
        }

        let job_id = generate_job_id();
        let job = job::new_job(&job_id, &scraper.scraper_id, url, scraper.options.clone());
        if let Err(e) = app.state.set(ns::JOBS, &job_id, &job).await {
            warn!(url, error = %e, "Failed to create warm-cache job");
            continue;
        }

        let payload = JobPayload {
            schema: scraper.schema.clone(),
            scraper_id: scraper.scraper_id.clone(),
        };
        if let Err(e) = app.state.set(ns::JOB_PAYLOADS, &job_id, &payload).await {
            warn!(url, error = %e, "Failed to store warm-cache payload");
            continue;
        }

        let envelope = ExtractionRequested {
            job_id: job_id.clone(),
            url: url.to_string(),
            scraper_id: scraper.scraper_id.clone(),
            options: scraper.options.clone(),
        };
        if let Err(e) = app.bus.publish(&envelope, &job_id).await {
            warn!(url, error = %e, "Failed to queue warm-cache job");
        } else {
            info!(%job_id, url, "Warm-cache job queued");
        }
    }
}

// ============================================================================
// Read side
// ============================================================================

/// Combined job status: the job row plus the live progress entry
#[derive(Debug, Serialize)]
pub struct JobStatusView {
    pub job_id: String,
    pub status: JobStatus,
    pub percent: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    pub url: String,
    pub scraper_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<crate::models::FailureStage>,
}

/// Status for a job, 404 when it never existed
pub async fn get_status(app: &AppState, job_id: &str) -> Result<JobStatusView, GatewayError> {
    let job: crate::models::Job = app
        .state
        .get(ns::JOBS, job_id)
        .await
        .map_err(GatewayError::Internal)?
        .ok_or_else(|| GatewayError::NotFound(format!("Job '{job_id}' not found")))?;

    let progress = app.progress.get(job_id).await;
    let percent = progress
        .as_ref()
        .map(|p| p.percent)
        .unwrap_or_else(|| default_percent(job.status, job.stage));

    Ok(JobStatusView {
        job_id: job.job_id,
        status: job.status,
        percent,
        message: progress.and_then(|p| p.message),
        created_at: job.created_at,
        updated_at: job.updated_at,
        url: job.url,
        scraper_id: job.scraper_id,
        error: job.error,
        stage: job.stage,
    })
}

fn default_percent(status: JobStatus, stage: Option<crate::models::FailureStage>) -> u8 {
    match status {
        JobStatus::Queued => 0,
        JobStatus::Fetching => 20,
        JobStatus::Fetched => 40,
        JobStatus::Extracting => 60,
        JobStatus::Extracted => 80,
        JobStatus::Validating => 90,
        JobStatus::Completed => 100,
        JobStatus::Failed => stage.map(|s| s.progress_percent()).unwrap_or(50),
    }
}

/// Result lookup outcome
#[derive(Debug)]
pub enum ResultsView {
    /// Terminal result row
    Ready(Box<ExtractionRecord>),
    /// The job exists but has not finished
    Pending { job_id: String, status: JobStatus },
}

/// Results for a job: the stored extraction, or its in-flight status
pub async fn get_results(app: &AppState, job_id: &str) -> Result<ResultsView, GatewayError> {
    if let Some(record) = app
        .state
        .get::<ExtractionRecord>(ns::EXTRACTIONS, job_id)
        .await
        .map_err(GatewayError::Internal)?
    {
        return Ok(ResultsView::Ready(Box::new(record)));
    }

    let job: crate::models::Job = app
        .state
        .get(ns::JOBS, job_id)
        .await
        .map_err(GatewayError::Internal)?
        .ok_or_else(|| GatewayError::NotFound(format!("Job '{job_id}' not found")))?;

    Ok(ResultsView::Pending {
        job_id: job.job_id,
        status: job.status,
    })
}

/// All registered monitors
pub async fn list_monitors(app: &AppState) -> Result<Vec<crate::models::Monitor>, GatewayError> {
    app.state
        .list(ns::MONITORS)
        .await
        .map_err(GatewayError::Internal)
}

/// Delete a monitor, 404 when absent
pub async fn delete_monitor(app: &AppState, monitor_id: &str) -> Result<(), GatewayError> {
    let existing: Option<crate::models::Monitor> = app
        .state
        .get(ns::MONITORS, monitor_id)
        .await
        .map_err(GatewayError::Internal)?;

    if existing.is_none() {
        return Err(GatewayError::NotFound(format!(
            "Monitor '{monitor_id}' not found"
        )));
    }

    app.state
        .delete(ns::MONITORS, monitor_id)
        .await
        .map_err(GatewayError::Internal)?;

    info!(monitor_id, "Monitor deleted");
    Ok(())
}

/// All registered scrapers
pub async fn list_scrapers(app: &AppState) -> Result<Vec<Scraper>, GatewayError> {
    app.state
        .list(ns::SCRAPERS)
        .await
        .map_err(GatewayError::Internal)
}

/// One scraper by id, 404 when absent
pub async fn get_scraper(app: &AppState, scraper_id: &str) -> Result<Scraper, GatewayError> {
    app.state
        .get(ns::SCRAPERS, scraper_id)
        .await
        .map_err(GatewayError::Internal)?
        .ok_or_else(|| GatewayError::NotFound(format!("Scraper '{scraper_id}' not found")))
}
