pub mod ids;
pub mod models;

pub use ids::{HolderId, IdError, RunId, SeatId, VehicleId};
pub use models::events::{BookingMap, BroadcastEvent};
