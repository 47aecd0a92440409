use coach_shared::{HolderId, IdError, RunId, SeatId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::repository::StoreError;

/// Booking request exactly as the transport receives it. Fields stay raw so
/// malformed input is rejected by the engine with a named error.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookSeatsPayload {
    #[serde(default)]
    pub run_id: String,
    #[serde(default)]
    pub seat_ids: Vec<String>,
    #[serde(default)]
    pub holder_id: String,
}

impl BookSeatsPayload {
    pub fn references(&self) -> Result<(RunId, HolderId), ReservationError> {
        let run_id = RunId::parse(self.run_id.as_str())?;
        let holder_id = HolderId::parse(self.holder_id.as_str())?;
        Ok((run_id, holder_id))
    }
}

/// Validated request: well-formed ids and a non-empty, de-duplicated seat set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationRequest {
    pub run_id: RunId,
    pub seat_ids: BTreeSet<SeatId>,
    pub holder_id: HolderId,
}

impl ReservationRequest {
    pub fn new(run_id: RunId, holder_id: HolderId, raw_seats: &[String]) -> Result<Self, ReservationError> {
        if raw_seats.is_empty() {
            return Err(ReservationError::EmptyRequest);
        }

        let mut seat_ids = BTreeSet::new();
        let mut malformed = BTreeSet::new();
        for raw in raw_seats {
            match SeatId::parse(raw.as_str()) {
                Ok(seat) => {
                    seat_ids.insert(seat);
                }
                Err(_) => {
                    malformed.insert(raw.clone());
                }
            }
        }

        // A malformed seat id can never be part of a layout.
        if !malformed.is_empty() {
            return Err(ReservationError::UnknownSeat(malformed.into_iter().collect()));
        }

        Ok(Self { run_id, seat_ids, holder_id })
    }
}

/// Wire name of every booking failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidReference,
    RunNotFound,
    EmptyRequest,
    UnknownSeat,
    SeatConflict,
    Timeout,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidReference => "InvalidReference",
            ErrorKind::RunNotFound => "RunNotFound",
            ErrorKind::EmptyRequest => "EmptyRequest",
            ErrorKind::UnknownSeat => "UnknownSeat",
            ErrorKind::SeatConflict => "SeatConflict",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Internal => "Internal",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReservationError {
    #[error("Invalid reference: {0}")]
    InvalidReference(#[from] IdError),

    /// Body did not have the `{runId, seatIds, holderId}` shape at all.
    #[error("Malformed booking request: {0}")]
    MalformedBody(String),

    #[error("Run not found: {0}")]
    RunNotFound(RunId),

    #[error("No seats requested")]
    EmptyRequest,

    #[error("Seats not in layout: {}", .0.join(", "))]
    UnknownSeat(Vec<String>),

    #[error("Seats already booked: {}", .0.iter().map(SeatId::as_str).collect::<Vec<_>>().join(", "))]
    SeatConflict(Vec<SeatId>),

    #[error("Seat claim did not finish within {0} ms")]
    Timeout(u64),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReservationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReservationError::InvalidReference(_) | ReservationError::MalformedBody(_) => {
                ErrorKind::InvalidReference
            }
            ReservationError::RunNotFound(_) => ErrorKind::RunNotFound,
            ReservationError::EmptyRequest => ErrorKind::EmptyRequest,
            ReservationError::UnknownSeat(_) => ErrorKind::UnknownSeat,
            ReservationError::SeatConflict(_) => ErrorKind::SeatConflict,
            ReservationError::Timeout(_) => ErrorKind::Timeout,
            ReservationError::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<StoreError> for ReservationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::RunNotFound(run_id) => ReservationError::RunNotFound(run_id),
            StoreError::UnknownSeat(seats) => ReservationError::UnknownSeat(seats),
            StoreError::SeatConflict(seats) => ReservationError::SeatConflict(seats),
            other => ReservationError::Internal(other.to_string()),
        }
    }
}
