//! Provisioning runs: start, inspect, cancel, follow.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use shopforge_core::RunId;

use crate::app::dto::{RunSummary, RunView, StartProvisioningRequest};
use crate::app::errors::ApiError;
use crate::app::services::{self, AppServices};

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

pub fn router() -> Router {
    Router::new()
        .route("/", post(start_run).get(list_runs))
        .route("/:run_id", get(get_run))
        .route("/:run_id/cancel", post(cancel_run))
        .route("/:run_id/events", get(run_events))
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// POST /provisioning
///
/// Answers 202 once the deployment was accepted (or the run already finished);
/// the rest of the run can be followed on `/provisioning/:run_id/events`.
pub async fn start_run(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<StartProvisioningRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let handle = services.provision(body.into()).await?;
    let run = handle.snapshot().await;
    Ok((StatusCode::ACCEPTED, Json(RunView::from(&run))))
}

/// GET /provisioning
pub async fn list_runs(Extension(services): Extension<Arc<AppServices>>) -> Json<Vec<RunSummary>> {
    let runs = services.runs().snapshots().await;
    Json(runs.iter().map(RunSummary::from).collect())
}

/// GET /provisioning/:run_id
pub async fn get_run(
    Extension(services): Extension<Arc<AppServices>>,
    Path(run_id): Path<String>,
) -> Result<Json<RunView>, ApiError> {
    let handle = services.run(parse_run_id(&run_id)?)?;
    Ok(Json(RunView::from(&handle.snapshot().await)))
}

/// POST /provisioning/:run_id/cancel
///
/// 409 when the run already finished.
pub async fn cancel_run(
    Extension(services): Extension<Arc<AppServices>>,
    Path(run_id): Path<String>,
) -> Result<Json<RunView>, ApiError> {
    let handle = services.run(parse_run_id(&run_id)?)?;
    let run = handle.cancel().await?;
    Ok(Json(RunView::from(&run)))
}

/// GET /provisioning/:run_id/events
pub async fn run_events(
    Extension(services): Extension<Arc<AppServices>>,
    Path(run_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let handle = services.run(parse_run_id(&run_id)?)?;
    Ok(services::run_sse_stream(services, handle).await)
}

fn parse_run_id(raw: &str) -> Result<RunId, ApiError> {
    raw.parse::<RunId>()
        .map_err(|_| ApiError::InvalidRunId(raw.to_string()))
}
