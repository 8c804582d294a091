//! Common test fixtures
//!
//! Builds a full in-process pipeline: in-memory state, event bus with all
//! four stages subscribed, and wiremock servers standing in for the
//! firecrawl and LLM providers.

// Each integration test binary uses a different slice of these helpers
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use pagelift::bus::EventBus;
use pagelift::cache::CacheLayer;
use pagelift::extractor::LlmClient;
use pagelift::gateway::AppState;
use pagelift::models::{Job, JobStatus, Schema};
use pagelift::pipeline::{register_stages, StageContext};
use pagelift::progress::ProgressStream;
use pagelift::scrape::{FirecrawlScraper, SimpleScraper};
use pagelift::state::{ns, State};

pub struct TestApp {
    pub app: AppState,
    pub firecrawl: MockServer,
    pub llm: MockServer,
}

/// Wire up a complete pipeline against mock providers
pub async fn spawn_app() -> TestApp {
    let firecrawl = MockServer::start().await;
    let llm = MockServer::start().await;

    let state = State::in_memory();
    let bus = EventBus::new();
    let progress = Arc::new(ProgressStream::new());
    let cache = CacheLayer::new(state.clone());

    let ctx = StageContext {
        state: state.clone(),
        cache: cache.clone(),
        progress: Arc::clone(&progress),
        firecrawl: Arc::new(FirecrawlScraper::with_base_url(&firecrawl.uri(), "fc-test").unwrap()),
        simple: Arc::new(SimpleScraper::new(100).unwrap()),
        llm: Arc::new(LlmClient::with_base_url(&llm.uri(), "sk-test").unwrap()),
    };
    register_stages(&bus, ctx).await;

    TestApp {
        app: AppState {
            state,
            bus,
            progress,
            cache,
        },
        firecrawl,
        llm,
    }
}

/// Schema used by most scenarios: an object with a required string title
pub fn title_schema() -> Schema {
    Schema::Structured(json!({
        "type": "object",
        "properties": {"title": {"type": "string"}},
        "required": ["title"]
    }))
}

/// Stub the firecrawl endpoint to return a page (html only, no markdown,
/// so the local cleaner runs)
pub async fn mock_firecrawl_page(server: &MockServer, html: &str) {
    Mock::given(method("POST"))
        .and(path("/v2/scrape"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": {
                "html": html,
                "metadata": {"title": "Stub Page", "status_code": 200}
            }
        })))
        .mount(server)
        .await;
}

/// Stub the chat-completions endpoint to return one JSON content string
pub async fn mock_llm_content(server: &MockServer, content: &str) {
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-test",
            "model": "gpt-4o-mini",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": content}
            }],
            "usage": {"prompt_tokens": 120, "completion_tokens": 8, "total_tokens": 128}
        })))
        .mount(server)
        .await;
}

/// Poll until the job reaches the wanted status, or panic after `timeout`
pub async fn wait_for_status(state: &State, job_id: &str, wanted: JobStatus, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(job) = state.get::<Job>(ns::JOBS, job_id).await.unwrap() {
            if job.status == wanted {
                return;
            }
            assert!(
                !(job.status.is_terminal() && job.status != wanted),
                "job {job_id} ended as {:?}, wanted {wanted:?}",
                job.status
            );
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {job_id} to reach {wanted:?}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
