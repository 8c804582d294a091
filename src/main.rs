use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pagelift::bus::EventBus;
use pagelift::cache::CacheLayer;
use pagelift::config::Config;
use pagelift::extractor::LlmClient;
use pagelift::gateway::{api::create_router, AppState};
use pagelift::pipeline::{register_stages, StageContext};
use pagelift::progress::ProgressStream;
use pagelift::scheduler;
use pagelift::scrape::{FirecrawlScraper, SimpleScraper};
use pagelift::state::{MemoryStateStore, RedisConfig, RedisStateStore, State};

#[derive(Parser)]
#[command(
    name = "pagelift",
    version,
    about = "Schema-driven web extraction pipeline with scheduled monitoring",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true, default_value = "text")]
    log_format: String,

    /// Config file path (falls back to environment variables)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway, pipeline stages, and monitor scheduler
    Serve {
        /// Bind address override (e.g. 0.0.0.0:8080)
        #[arg(short, long)]
        bind: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };

    init_logging(&cli, &config);

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind_address = bind.parse()?;
            }
            config.validate()?;
            serve(config).await
        }
    }
}

fn init_logging(cli: &Cli, config: &Config) {
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("pagelift={level}")));

    let registry = tracing_subscriber::registry().with(filter);
    if cli.log_format == "json" || config.logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn serve(config: Config) -> Result<()> {
    // Redis when available, in-memory otherwise
    let state = match RedisStateStore::try_new(&RedisConfig::from_env()).await {
        Some(store) => State::new(Arc::new(store)),
        None => State::new(Arc::new(MemoryStateStore::new())),
    };

    let bus = EventBus::new();
    let progress = Arc::new(ProgressStream::new());
    let cache = CacheLayer::new(state.clone());

    let stages = StageContext {
        state: state.clone(),
        cache: cache.clone(),
        progress: Arc::clone(&progress),
        firecrawl: Arc::new(FirecrawlScraper::from_env()?),
        simple: Arc::new(SimpleScraper::new(config.scrape.simple_rate_limit)?),
        llm: Arc::new(LlmClient::from_env()?),
    };
    register_stages(&bus, stages).await;

    let scheduler_handle = if config.scheduler.enabled {
        Some(scheduler::spawn(
            state.clone(),
            Arc::clone(&bus),
            Duration::from_secs(config.scheduler.tick_secs),
        ))
    } else {
        None
    };

    let app = AppState {
        state,
        bus,
        progress,
        cache,
    };
    let router = create_router(app);

    let listener = tokio::net::TcpListener::bind(config.server.bind_address).await?;
    tracing::info!(address = %config.server.bind_address, "Gateway listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = scheduler_handle {
        handle.abort();
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
