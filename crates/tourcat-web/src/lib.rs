//! Axum JSON control surface for the ingestion service.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tourcat_sync::{
    service_from_config, IngestionService, SchedulerError, ScrapeFailure, SyncConfig,
};
use tracing::info;

pub const CRATE_NAME: &str = "tourcat-web";

#[derive(Clone)]
pub struct AppState {
    pub service: IngestionService,
}

impl AppState {
    pub fn new(service: IngestionService) -> Self {
        Self { service }
    }
}

#[derive(Debug, Deserialize)]
struct AddCitiesBody {
    cities: Vec<String>,
}

#[derive(Debug, Serialize)]
struct AddCitiesResponse {
    added: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CityBody {
    city: String,
}

#[derive(Debug, Deserialize, Default)]
struct CityQuery {
    city: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct CronQuery {
    cron: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CronBody {
    cron: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    status_code: u16,
    message: String,
    detail: String,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/cities", get(list_cities_handler).post(add_cities_handler))
        .route("/cities/new", post(new_city_handler))
        .route("/scrape", post(scrape_handler))
        .route("/logs", get(logs_handler).delete(clear_logs_handler))
        .route("/scheduler", get(scheduler_status_handler))
        .route("/scheduler/pause", post(scheduler_pause_handler))
        .route("/scheduler/resume", post(scheduler_resume_handler))
        .route("/scheduler/schedule", put(scheduler_schedule_handler))
        .route("/tours", get(tours_handler))
        .route("/tours/{city}/{slug}", get(single_tour_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(service: IngestionService, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "control surface listening");
    axum::serve(listener, app(AppState::new(service))).await?;
    Ok(())
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let config = SyncConfig::from_env();
    let service = service_from_config(&config).await?;
    serve(service, config.web_port).await
}

async fn list_cities_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.service.cities().await {
        Ok(cities) => Json(cities).into_response(),
        Err(err) => server_error(err),
    }
}

async fn add_cities_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AddCitiesBody>,
) -> Response {
    match state.service.add_cities(&body.cities).await {
        Ok(added) => Json(AddCitiesResponse { added }).into_response(),
        Err(err) => server_error(err),
    }
}

async fn new_city_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CityBody>,
) -> Response {
    match state.service.scrape_new_city_once(&body.city).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(err) => server_error(err),
    }
}

async fn scrape_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CityQuery>,
) -> Response {
    match state.service.run_scrape(query.city.as_deref()).await {
        Ok(ack) => Json(ack).into_response(),
        Err(failure) => scrape_failure(failure),
    }
}

async fn logs_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(state.service.logs()).into_response()
}

async fn clear_logs_handler(State(state): State<Arc<AppState>>) -> Response {
    state.service.clear_logs();
    StatusCode::NO_CONTENT.into_response()
}

async fn scheduler_status_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(state.service.scheduler_status().await).into_response()
}

async fn scheduler_pause_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.service.pause().await {
        Ok(status) => Json(status).into_response(),
        Err(err) => scheduler_error(err),
    }
}

async fn scheduler_resume_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CronQuery>,
) -> Response {
    match state.service.resume(query.cron.as_deref()).await {
        Ok(status) => Json(status).into_response(),
        Err(err) => scheduler_error(err),
    }
}

async fn scheduler_schedule_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CronBody>,
) -> Response {
    match state.service.set_schedule(&body.cron).await {
        Ok(status) => Json(status).into_response(),
        Err(err) => scheduler_error(err),
    }
}

async fn tours_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CityQuery>,
) -> Response {
    match state.service.catalog(query.city.as_deref()).await {
        Ok(entries) => Json(entries).into_response(),
        Err(err) => server_error(err),
    }
}

async fn single_tour_handler(
    State(state): State<Arc<AppState>>,
    Path((city, slug)): Path<(String, String)>,
) -> Response {
    match state.service.scrape_single_tour(&city, &slug).await {
        Ok(detail) => Json(detail).into_response(),
        Err(err) => error_response(
            StatusCode::BAD_GATEWAY,
            "Tour page unavailable",
            err.to_string(),
        ),
    }
}

fn error_response(status: StatusCode, message: &str, detail: String) -> Response {
    (
        status,
        Json(ErrorBody {
            status_code: status.as_u16(),
            message: message.to_string(),
            detail,
        }),
    )
        .into_response()
}

fn scrape_failure(failure: ScrapeFailure) -> Response {
    let status =
        StatusCode::from_u16(failure.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(failure)).into_response()
}

fn scheduler_error(err: SchedulerError) -> Response {
    match err {
        SchedulerError::InvalidCron { .. } => {
            error_response(StatusCode::BAD_REQUEST, "Invalid schedule", err.to_string())
        }
        SchedulerError::Timer(_) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Scheduler failure",
            err.to_string(),
        ),
    }
}

fn server_error(err: anyhow::Error) -> Response {
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Server error",
        format!("{err:#}"),
    )
}
