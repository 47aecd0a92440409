use chrono::{DateTime, NaiveDate, Utc};
use coach_shared::{BookingMap, HolderId, RunId, SeatId, VehicleId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::repository::{ClaimOutcome, StoreError};

/// Booked is terminal; there is no hold, release or expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatState {
    Booked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatBookingRecord {
    pub seat_id: SeatId,
    pub holder_id: HolderId,
    pub state: SeatState,
    pub booked_at: DateTime<Utc>,
}

/// Upstream description of a run, delivered when a schedule is added to a vehicle.
/// The layout is fixed for the lifetime of the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSpec {
    pub run_id: RunId,
    pub vehicle_id: Option<VehicleId>,
    pub date: Option<NaiveDate>,
    pub layout: Vec<SeatId>,
}

impl RunSpec {
    pub fn new(
        run_id: RunId,
        vehicle_id: Option<VehicleId>,
        date: Option<NaiveDate>,
        layout: Vec<SeatId>,
    ) -> Result<Self, StoreError> {
        if layout.is_empty() {
            return Err(StoreError::InvalidLayout(format!("run {} has no seats", run_id)));
        }

        {
            let mut seen = HashSet::with_capacity(layout.len());
            if let Some(dup) = layout.iter().find(|seat| !seen.insert(*seat)) {
                return Err(StoreError::InvalidLayout(format!(
                    "seat {} appears more than once in run {}",
                    dup, run_id
                )));
            }
        }

        Ok(Self { run_id, vehicle_id, date, layout })
    }

    pub fn contains(&self, seat: &SeatId) -> bool {
        self.layout.iter().any(|s| s == seat)
    }
}

/// Mutable half of a run: who holds which seat, plus the claim counter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingLedger {
    pub bookings: BTreeMap<SeatId, SeatBookingRecord>,
    pub version: u64,
}

impl BookingLedger {
    /// All-or-nothing claim. Seats outside the layout are reported before
    /// conflicts, and nothing is written unless every requested seat is free.
    pub fn claim(
        &mut self,
        spec: &RunSpec,
        seats: &BTreeSet<SeatId>,
        holder: &HolderId,
        at: DateTime<Utc>,
    ) -> Result<ClaimOutcome, StoreError> {
        let unknown: Vec<String> = seats
            .iter()
            .filter(|seat| !spec.contains(seat))
            .map(|seat| seat.to_string())
            .collect();
        if !unknown.is_empty() {
            return Err(StoreError::UnknownSeat(unknown));
        }

        let taken: Vec<SeatId> = seats
            .iter()
            .filter(|seat| self.bookings.contains_key(*seat))
            .cloned()
            .collect();
        if !taken.is_empty() {
            return Err(StoreError::SeatConflict(taken));
        }

        for seat in seats {
            self.bookings.insert(
                seat.clone(),
                SeatBookingRecord {
                    seat_id: seat.clone(),
                    holder_id: holder.clone(),
                    state: SeatState::Booked,
                    booked_at: at,
                },
            );
        }
        self.version += 1;

        Ok(ClaimOutcome {
            bookings: self.booking_map(),
            version: self.version,
        })
    }

    pub fn booking_map(&self) -> BookingMap {
        holders(&self.bookings)
    }
}

fn holders(bookings: &BTreeMap<SeatId, SeatBookingRecord>) -> BookingMap {
    bookings
        .iter()
        .map(|(seat, record)| (seat.clone(), record.holder_id.clone()))
        .collect()
}

/// Snapshot of one run as handed out by a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleRun {
    pub run_id: RunId,
    pub vehicle_id: Option<VehicleId>,
    pub date: Option<NaiveDate>,
    pub layout: Vec<SeatId>,
    pub bookings: BTreeMap<SeatId, SeatBookingRecord>,
    pub version: u64,
}

impl VehicleRun {
    pub fn from_parts(spec: &RunSpec, ledger: &BookingLedger) -> Self {
        Self {
            run_id: spec.run_id.clone(),
            vehicle_id: spec.vehicle_id.clone(),
            date: spec.date,
            layout: spec.layout.clone(),
            bookings: ledger.bookings.clone(),
            version: ledger.version,
        }
    }

    pub fn booking_map(&self) -> BookingMap {
        holders(&self.bookings)
    }

    /// The creation input this run was stored from.
    pub fn spec(&self) -> RunSpec {
        RunSpec {
            run_id: self.run_id.clone(),
            vehicle_id: self.vehicle_id.clone(),
            date: self.date,
            layout: self.layout.clone(),
        }
    }

    /// Storing `spec` over this run would fail with `LayoutInUse`.
    pub fn rejects_replacement(&self, spec: &RunSpec) -> bool {
        !self.bookings.is_empty() && self.spec() != *spec
    }

    /// Layout seats nobody holds, in layout order.
    pub fn available_seats(&self) -> Vec<SeatId> {
        self.layout
            .iter()
            .filter(|seat| !self.bookings.contains_key(*seat))
            .cloned()
            .collect()
    }
}
