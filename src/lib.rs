//! pagelift - Schema-driven web extraction pipeline
//!
//! Users register *scrapers* (a name plus an extraction schema), POST URLs
//! at them, and get back structured data extracted by an LLM from the
//! fetched page. A monitor scheduler re-scrapes registered URLs on
//! interval or cron schedules.
//!
//! # Architecture
//!
//! The pipeline is a message-driven graph over an event bus with FIFO
//! message groups:
//!
//! - [`gateway`] - Request entry point: sync/async modes, scraper CRUD
//! - [`bus`] - Topic bus with per-group FIFO lanes and a payload size cap
//! - [`pipeline`] - The Fetch, Extract, Store, and failure stages
//! - [`cache`] - Extraction and content caches over the state store
//! - [`scheduler`] - Periodic tick firing due monitors
//! - [`state`] - Namespaced key-value store (memory or Redis)
//! - [`scrape`] - Rendering and HTTP-only scrape back-ends
//! - [`cleaner`] - HTML to markdown reduction
//! - [`extractor`] - LLM extraction client and prompt builder
//! - [`validator`] - JSON Schema validation of extracted data
//!
//! # Example
//!
//! ```no_run
//! use pagelift::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let state = State::in_memory();
//!     let bus = EventBus::new();
//!     let progress = Arc::new(ProgressStream::new());
//!     let cache = CacheLayer::new(state.clone());
//!     let app = AppState { state, bus, progress, cache };
//!     // axum::serve(listener, pagelift::gateway::api::create_router(app)) ...
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod cache;
pub mod cleaner;
pub mod config;
pub mod error;
pub mod extractor;
pub mod gateway;
pub mod job;
pub mod models;
pub mod monitor;
pub mod pipeline;
pub mod progress;
pub mod scheduler;
pub mod scrape;
pub mod state;
pub mod utils;
pub mod validator;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::bus::{EventBus, Topic};
    pub use crate::cache::CacheLayer;
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorKind, Result};
    pub use crate::gateway::AppState;
    pub use crate::models::{Job, JobStatus, Monitor, Schema, ScrapeOptions, Scraper};
    pub use crate::progress::ProgressStream;
    pub use crate::state::State;
}

// Direct re-exports for convenience
pub use models::{Job, JobStatus, Monitor, Schema, Scraper};
