pub mod run;
pub mod repository;
pub mod reservation;

pub use coach_shared::{BookingMap, BroadcastEvent, HolderId, IdError, RunId, SeatId, VehicleId};
pub use repository::{ClaimOutcome, ScheduleStore, StoreError, StoreResult};
pub use reservation::{BookSeatsPayload, ErrorKind, ReservationError, ReservationRequest};
pub use run::{BookingLedger, RunSpec, SeatBookingRecord, SeatState, VehicleRun};
