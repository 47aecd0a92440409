use crate::ids::{HolderId, RunId, SeatId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Seat -> holder projection of a run's bookings. This is the shape every
/// client sees, both in booking replies and on the observer channel.
pub type BookingMap = BTreeMap<SeatId, HolderId>;

/// Handed to the notification hub after a successful claim.
///
/// `version` is the run's claim counter after the mutation. Publishes are
/// fire-and-forget, so two events for one run can arrive out of order; an
/// observer keeps the map with the highest version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastEvent {
    pub run_id: RunId,
    pub bookings: BookingMap,
    pub version: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_shape_is_camel_case() {
        let mut bookings = BookingMap::new();
        bookings.insert(SeatId::parse("S1").unwrap(), HolderId::parse("X").unwrap());
        let event = BroadcastEvent {
            run_id: RunId::parse("R1").unwrap(),
            bookings,
            version: 1,
        };

        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({ "runId": "R1", "bookings": { "S1": "X" }, "version": 1 })
        );
    }
}
