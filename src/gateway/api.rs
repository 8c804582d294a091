//! HTTP surface for the gateway
//!
//! Thin axum handlers over the gateway operations: decode the request,
//! call the operation, map the outcome onto a status code and JSON body.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

use super::{
    create_scraper, delete_monitor, get_results, get_scraper, get_status, list_monitors,
    list_scrapers, run_scraper, AppState, CreateScraperRequest, GatewayError, ResultsView,
    RunOptions, RunOutcome,
};

/// Build the public router
pub fn create_router(app: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/scrapers", post(create_scraper_handler).get(list_scrapers_handler))
        .route("/scrapers/{scraper_id}", get(get_scraper_handler))
        .route("/scrape/{scraper_id}", post(run_scraper_handler))
        .route("/status/{job_id}", get(status_handler))
        .route("/results/{job_id}", get(results_handler))
        .route("/monitors", get(monitors_handler))
        .route("/monitors/{monitor_id}", delete(delete_monitor_handler))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(app)
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            GatewayError::InvalidInput(message) => (StatusCode::BAD_REQUEST, message.clone()),
            GatewayError::NotFound(message) => (StatusCode::NOT_FOUND, message.clone()),
            GatewayError::Internal(e) => {
                error!(error = %e, "Gateway internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };
        (status, Json(json!({"error": message}))).into_response()
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Deserialize)]
struct RunScraperBody {
    #[serde(default)]
    url: String,
    #[serde(default)]
    options: RunOptions,
}

async fn run_scraper_handler(
    State(app): State<AppState>,
    Path(scraper_id): Path<String>,
    Json(body): Json<RunScraperBody>,
) -> Result<Response, GatewayError> {
    let outcome = run_scraper(&app, &scraper_id, &body.url, body.options).await?;

    let response = match outcome {
        RunOutcome::Completed {
            job_id,
            scraper_id,
            url,
            data,
            cached,
            cache_type,
            cached_at,
            monitoring,
        } => (
            StatusCode::OK,
            Json(json!({
                "job_id": job_id,
                "scraper_id": scraper_id,
                "status": "completed",
                "data": data,
                "url": url,
                "cached": cached,
                "cache_type": cache_type,
                "cached_at": cached_at,
                "monitoring": monitoring.monitoring,
                "monitor_id": monitoring.monitor_id,
                "next_run": monitoring.next_run,
            })),
        )
            .into_response(),
        RunOutcome::Failed {
            job_id,
            scraper_id,
            url,
            error,
            stage,
            monitoring,
        } => (
            StatusCode::OK,
            Json(json!({
                "job_id": job_id,
                "scraper_id": scraper_id,
                "status": "failed",
                "error": error,
                "stage": stage,
                "url": url,
                "monitoring": monitoring.monitoring,
            })),
        )
            .into_response(),
        RunOutcome::Queued {
            job_id,
            scraper_id,
            status_url,
            results_url,
            message,
            monitoring,
        } => (
            StatusCode::ACCEPTED,
            Json(json!({
                "job_id": job_id,
                "scraper_id": scraper_id,
                "status": "queued",
                "status_url": status_url,
                "results_url": results_url,
                "message": message,
                "monitoring": monitoring.monitoring,
                "monitor_id": monitoring.monitor_id,
                "next_run": monitoring.next_run,
            })),
        )
            .into_response(),
    };

    Ok(response)
}

async fn create_scraper_handler(
    State(app): State<AppState>,
    Json(body): Json<CreateScraperRequest>,
) -> Result<Response, GatewayError> {
    let created = create_scraper(&app, body).await?;
    Ok((StatusCode::CREATED, Json(created)).into_response())
}

async fn list_scrapers_handler(State(app): State<AppState>) -> Result<Response, GatewayError> {
    let scrapers = list_scrapers(&app).await?;
    Ok(Json(json!({
        "count": scrapers.len(),
        "scrapers": scrapers,
    }))
    .into_response())
}

async fn get_scraper_handler(
    State(app): State<AppState>,
    Path(scraper_id): Path<String>,
) -> Result<Response, GatewayError> {
    let scraper = get_scraper(&app, &scraper_id).await?;

    let monitor_count = list_monitors(&app)
        .await?
        .iter()
        .filter(|m| m.scraper_id == scraper.scraper_id)
        .count();

    let mut body = serde_json::to_value(&scraper)
        .map_err(|e| GatewayError::Internal(e.into()))?;
    if let Some(object) = body.as_object_mut() {
        object.insert(
            "endpoint".to_string(),
            json!(format!("/scrape/{}", scraper.scraper_id)),
        );
        object.insert("monitor_count".to_string(), json!(monitor_count));
    }

    Ok(Json(body).into_response())
}

async fn status_handler(
    State(app): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Response, GatewayError> {
    let status = get_status(&app, &job_id).await?;
    Ok(Json(status).into_response())
}

async fn results_handler(
    State(app): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Response, GatewayError> {
    match get_results(&app, &job_id).await? {
        ResultsView::Ready(record) => Ok(Json(*record).into_response()),
        ResultsView::Pending { job_id, status } => Ok((
            StatusCode::ACCEPTED,
            Json(json!({
                "job_id": job_id,
                "status": status,
                "message": "Extraction not complete",
            })),
        )
            .into_response()),
    }
}

async fn monitors_handler(State(app): State<AppState>) -> Result<Response, GatewayError> {
    let monitors = list_monitors(&app).await?;
    Ok(Json(json!({
        "count": monitors.len(),
        "monitors": monitors,
    }))
    .into_response())
}

async fn delete_monitor_handler(
    State(app): State<AppState>,
    Path(monitor_id): Path<String>,
) -> Result<Response, GatewayError> {
    delete_monitor(&app, &monitor_id).await?;
    Ok(Json(json!({
        "deleted": true,
        "monitor_id": monitor_id,
    }))
    .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobStatus;

    #[test]
    fn test_job_status_serializes_for_responses() {
        // JobStatus rides raw in the pending-results body
        assert_eq!(
            serde_json::to_value(JobStatus::Extracting).unwrap(),
            json!("extracting")
        );
    }

    #[test]
    fn test_run_body_tolerates_missing_options() {
        let body: RunScraperBody =
            serde_json::from_value(json!({"url": "https://x/a"})).unwrap();
        assert_eq!(body.url, "https://x/a");
        assert!(!body.options.run_async);
        assert!(body.options.use_cache.is_none());
    }

    #[test]
    fn test_run_body_parses_async_flag() {
        let body: RunScraperBody = serde_json::from_value(json!({
            "url": "https://x/a",
            "options": {"async": true, "skip_monitoring": true}
        }))
        .unwrap();
        assert!(body.options.run_async);
        assert!(body.options.skip_monitoring);
    }
}
