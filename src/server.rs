//! HTTP API.
//!
//! Submission only enqueues: `POST /api/analyze` answers `202 Accepted`
//! with the `pending` job before any pipeline work starts. Status and
//! report reads go straight to the job registry.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/analyze` | Queue an analysis (`{ "repo_url", "branch"? }`) |
//! | `GET`  | `/api/status/{job_id}` | Current job snapshot |
//! | `GET`  | `/api/report/{job_id}` | Report of a completed job |
//! | `GET`  | `/api/jobs` | Recent jobs, newest first (`?limit=`) |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_ready", "message": "report for job … is not ready (status: processing)" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `not_ready` (409),
//! `job_failed` (409), `queue_full` (503), `unavailable` (503), `internal` (500).

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use repo_health_core::models::{JobId, JobSnapshot};
use repo_health_core::report::Report;

use crate::config::Config;
use crate::errors::{RegistryError, SubmitError};
use crate::orchestrator::{start_from_config, AnalysisService, Runtime};

#[derive(Clone)]
struct AppState {
    service: AnalysisService,
}

/// Start the configured service and serve the API on `[server] bind` until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let runtime = start_server_runtime(config).await?;
    let app = router(runtime.service);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "repo-health API listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Start the runtime the API serves, failing jobs a previous server left
/// `pending` or `processing`. Their worker died with that process.
pub async fn start_server_runtime(config: &Config) -> anyhow::Result<Runtime> {
    let runtime = start_from_config(config).await?;
    runtime.service.registry().fail_interrupted().await?;
    Ok(runtime)
}

/// The API router over an already running service.
pub fn router(service: AnalysisService) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/analyze", post(handle_analyze))
        .route("/api/status/{job_id}", get(handle_status))
        .route("/api/report/{job_id}", get(handle_report))
        .route("/api/jobs", get(handle_list_jobs))
        .route("/health", get(handle_health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { service })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::NOT_FOUND, "not_found", message)
}

impl From<RegistryError> for AppError {
    fn from(e: RegistryError) -> Self {
        match &e {
            RegistryError::NotFound(_) => not_found(e.to_string()),
            RegistryError::NotReady { .. } => {
                AppError::new(StatusCode::CONFLICT, "not_ready", e.to_string())
            }
            RegistryError::Failed { .. } => {
                AppError::new(StatusCode::CONFLICT, "job_failed", e.to_string())
            }
            _ => {
                tracing::error!(error = %e, "registry error");
                AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", e.to_string())
            }
        }
    }
}

impl From<SubmitError> for AppError {
    fn from(e: SubmitError) -> Self {
        match e {
            SubmitError::InvalidUrl(inner) => bad_request(inner.to_string()),
            SubmitError::QueueFull { .. } => {
                AppError::new(StatusCode::SERVICE_UNAVAILABLE, "queue_full", e.to_string())
            }
            SubmitError::Closed => {
                AppError::new(StatusCode::SERVICE_UNAVAILABLE, "unavailable", e.to_string())
            }
            SubmitError::Registry(inner) => inner.into(),
        }
    }
}

/// Unparseable ids cannot name a job, so they are reported as not found.
fn parse_job_id(raw: &str) -> Result<JobId, AppError> {
    Uuid::parse_str(raw).map_err(|_| not_found(format!("job {} not found", raw)))
}

// ============ POST /api/analyze ============

#[derive(Deserialize)]
struct AnalyzeRequest {
    repo_url: String,
    #[serde(default)]
    branch: Option<String>,
}

async fn handle_analyze(
    State(state): State<AppState>,
    payload: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<JobSnapshot>), AppError> {
    let Json(req) = payload.map_err(|e| bad_request(e.body_text()))?;
    if req.repo_url.trim().is_empty() {
        return Err(bad_request("repo_url must not be empty"));
    }
    let job = state.service.submit(&req.repo_url, req.branch).await?;
    Ok((StatusCode::ACCEPTED, Json(job.snapshot())))
}

// ============ GET /api/status/{job_id} ============

async fn handle_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobSnapshot>, AppError> {
    let id = parse_job_id(&job_id)?;
    let job = state.service.registry().get(id).await?;
    Ok(Json(job.snapshot()))
}

// ============ GET /api/report/{job_id} ============

async fn handle_report(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<Report>, AppError> {
    let id = parse_job_id(&job_id)?;
    Ok(Json(state.service.registry().report(id).await?))
}

// ============ GET /api/jobs ============

#[derive(Deserialize)]
struct ListParams {
    limit: Option<usize>,
}

async fn handle_list_jobs(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<JobSnapshot>>, AppError> {
    let limit = params.limit.unwrap_or(50).clamp(1, 500);
    let jobs = state.service.registry().list(limit).await?;
    Ok(Json(jobs.iter().map(|j| j.snapshot()).collect()))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
