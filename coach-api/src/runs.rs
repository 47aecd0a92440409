use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use chrono::NaiveDate;
use coach_core::{BookingMap, RunId, RunSpec, SeatId, StoreError, VehicleId, VehicleRun};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::AppError;
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutRunRequest {
    pub vehicle_id: Option<String>,
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub seat_ids: Vec<String>,
}

/// One schedule per date for a vehicle, all sharing the vehicle's layout.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddSchedulesRequest {
    pub dates: Vec<NaiveDate>,
    #[serde(default)]
    pub seat_ids: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResponse {
    pub run_id: RunId,
    pub vehicle_id: Option<VehicleId>,
    pub date: Option<NaiveDate>,
    pub layout: Vec<SeatId>,
    pub bookings: BookingMap,
    pub available: Vec<SeatId>,
    pub version: u64,
}

impl From<VehicleRun> for RunResponse {
    fn from(run: VehicleRun) -> Self {
        let bookings = run.booking_map();
        let available = run.available_seats();
        Self {
            run_id: run.run_id,
            vehicle_id: run.vehicle_id,
            date: run.date,
            layout: run.layout,
            bookings,
            available,
            version: run.version,
        }
    }
}

fn parse_layout(raw: &[String]) -> Result<Vec<SeatId>, AppError> {
    raw.iter()
        .map(|s| SeatId::parse(s.as_str()).map_err(|e| AppError::ValidationError(e.to_string())))
        .collect()
}

fn parse_run_id(raw: String) -> Result<RunId, AppError> {
    RunId::parse(raw).map_err(|e| AppError::ValidationError(e.to_string()))
}

fn parse_vehicle_id(raw: String) -> Result<VehicleId, AppError> {
    VehicleId::parse(raw).map_err(|e| AppError::ValidationError(e.to_string()))
}

// ============================================================================
// Handlers
// ============================================================================

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/runs", get(list_runs))
        .route("/v1/runs/{run_id}", get(get_run).put(put_run))
        .route("/v1/vehicles/{vehicle_id}/runs", post(add_schedules))
}

/// GET /v1/runs/{run_id}
async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<RunResponse>, AppError> {
    let run_id = parse_run_id(run_id)?;
    let run = state.store.get_run(&run_id).await?;
    Ok(Json(run.into()))
}

/// GET /v1/runs
async fn list_runs(State(state): State<AppState>) -> Result<Json<Vec<RunResponse>>, AppError> {
    let runs = state.store.list_runs().await?;
    Ok(Json(runs.into_iter().map(RunResponse::from).collect()))
}

/// PUT /v1/runs/{run_id}
/// Create a run, or replace it while nothing is booked.
async fn put_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(req): Json<PutRunRequest>,
) -> Result<Json<RunResponse>, AppError> {
    let run_id = parse_run_id(run_id)?;
    let vehicle_id = req.vehicle_id.map(parse_vehicle_id).transpose()?;
    let layout = parse_layout(&req.seat_ids)?;

    let spec = RunSpec::new(run_id, vehicle_id, req.date, layout)?;
    let run = state.store.create_or_replace_run(spec).await?;
    Ok(Json(run.into()))
}

/// POST /v1/vehicles/{vehicle_id}/runs
/// Adds one run per date, addressed as `{vehicle_id}:{date}`.
async fn add_schedules(
    State(state): State<AppState>,
    Path(vehicle_id): Path<String>,
    Json(req): Json<AddSchedulesRequest>,
) -> Result<(StatusCode, Json<Vec<RunResponse>>), AppError> {
    let vehicle_id = parse_vehicle_id(vehicle_id)?;
    if req.dates.is_empty() {
        return Err(AppError::ValidationError("At least one date is required".to_string()));
    }
    let layout = parse_layout(&req.seat_ids)?;

    let specs = req
        .dates
        .iter()
        .map(|date| {
            let run_id = RunId::for_vehicle(&vehicle_id, *date).map_err(|e| AppError::ValidationError(e.to_string()))?;
            Ok(RunSpec::new(run_id, Some(vehicle_id.clone()), Some(*date), layout.clone())?)
        })
        .collect::<Result<Vec<_>, AppError>>()?;

    // Nothing is stored while any date's existing run would refuse the new
    // layout. A booking that lands after this check can still fail a later
    // date with `LayoutInUse`; earlier dates then stay stored.
    for spec in &specs {
        match state.store.get_run(&spec.run_id).await {
            Ok(existing) if existing.rejects_replacement(spec) => {
                return Err(StoreError::LayoutInUse(spec.run_id.clone()).into());
            }
            Ok(_) | Err(StoreError::RunNotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }

    let mut created = Vec::with_capacity(specs.len());
    for spec in specs {
        created.push(RunResponse::from(state.store.create_or_replace_run(spec).await?));
    }

    info!(vehicle_id = %vehicle_id, runs = created.len(), "Schedules added");
    Ok((StatusCode::CREATED, Json(created)))
}
