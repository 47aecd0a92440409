use async_trait::async_trait;
use coach_shared::{BookingMap, HolderId, RunId, SeatId};
use std::collections::BTreeSet;

use crate::run::{RunSpec, VehicleRun};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Run not found: {0}")]
    RunNotFound(RunId),

    #[error("Seats not in layout: {}", .0.join(", "))]
    UnknownSeat(Vec<String>),

    #[error("Seats already booked: {}", join_seats(.0))]
    SeatConflict(Vec<SeatId>),

    #[error("Invalid layout: {0}")]
    InvalidLayout(String),

    #[error("Run {0} already has bookings, its layout cannot change")]
    LayoutInUse(RunId),

    #[error("Store backend error: {0}")]
    Backend(String),
}

fn join_seats(seats: &[SeatId]) -> String {
    seats.iter().map(SeatId::as_str).collect::<Vec<_>>().join(", ")
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Full booking map and claim counter right after a successful claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimOutcome {
    pub bookings: BookingMap,
    pub version: u64,
}

/// Single source of truth for run layouts and booking state.
///
/// `try_claim_seats` is the only path that mutates bookings. Implementations
/// must run its check-free-then-claim as one atomic step per run, and must
/// not report success before the claim is stored.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn get_run(&self, run_id: &RunId) -> StoreResult<VehicleRun>;

    /// Existence check that does not read the run's bookings.
    async fn run_exists(&self, run_id: &RunId) -> StoreResult<bool>;

    async fn try_claim_seats(
        &self,
        run_id: &RunId,
        seat_ids: &BTreeSet<SeatId>,
        holder_id: &HolderId,
    ) -> StoreResult<ClaimOutcome>;

    /// Entry point for the schedule-creation collaborator. Replacing a run that
    /// already has bookings only succeeds when the spec is unchanged.
    async fn create_or_replace_run(&self, spec: RunSpec) -> StoreResult<VehicleRun>;

    async fn list_runs(&self) -> StoreResult<Vec<VehicleRun>>;

    async fn health_check(&self) -> StoreResult<()>;
}
