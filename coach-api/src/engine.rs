use coach_core::{
    BookSeatsPayload, BroadcastEvent, ClaimOutcome, ReservationError, ReservationRequest, ScheduleStore,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::hub::NotificationHub;
use crate::metrics::Metrics;

/// Validates booking requests, runs the store's atomic claim and hands
/// successful claims to the notification hub.
///
/// There are no retries here. A `SeatConflict` means someone else holds a
/// seat; the caller decides whether to try other seats.
pub struct ReservationEngine {
    store: Arc<dyn ScheduleStore>,
    hub: Arc<NotificationHub>,
    metrics: Arc<Metrics>,
    claim_timeout: Duration,
}

impl ReservationEngine {
    pub fn new(
        store: Arc<dyn ScheduleStore>,
        hub: Arc<NotificationHub>,
        metrics: Arc<Metrics>,
        claim_timeout: Duration,
    ) -> Self {
        Self { store, hub, metrics, claim_timeout }
    }

    pub async fn book_seats(&self, payload: &BookSeatsPayload) -> Result<ClaimOutcome, ReservationError> {
        let result = self.try_book(payload).await;

        match &result {
            Ok(_) => self.metrics.record_booking("ok"),
            Err(e) => {
                self.metrics.record_booking(e.kind().as_str());
                match e {
                    ReservationError::Internal(msg) => error!(run_id = %payload.run_id, "Booking failed: {}", msg),
                    ReservationError::Timeout(_) => error!(run_id = %payload.run_id, "Booking timed out"),
                    other => info!(run_id = %payload.run_id, holder_id = %payload.holder_id, "Booking rejected: {}", other),
                }
            }
        }

        result
    }

    /// A booking whose body could not be read as a payload. Counted and
    /// logged like any other rejection.
    pub fn reject_body(&self, detail: impl Into<String>) -> ReservationError {
        let err = ReservationError::MalformedBody(detail.into());
        self.metrics.record_booking(err.kind().as_str());
        info!("Booking rejected: {}", err);
        err
    }

    async fn try_book(&self, payload: &BookSeatsPayload) -> Result<ClaimOutcome, ReservationError> {
        // 1. Well-formed references
        let (run_id, holder_id) = payload.references()?;

        // 2. Run must exist
        if !self.store.run_exists(&run_id).await? {
            return Err(ReservationError::RunNotFound(run_id));
        }

        // 3. Non-empty seat set
        let request = ReservationRequest::new(run_id, holder_id, &payload.seat_ids)?;

        // 4. Atomic claim, bounded
        let timer = self.metrics.claim_duration.start_timer();
        let claimed = tokio::time::timeout(
            self.claim_timeout,
            self.store
                .try_claim_seats(&request.run_id, &request.seat_ids, &request.holder_id),
        )
        .await;
        timer.observe_duration();

        let outcome = match claimed {
            Ok(result) => result?,
            Err(_) => return Err(ReservationError::Timeout(self.claim_timeout.as_millis() as u64)),
        };

        info!(
            run_id = %request.run_id,
            holder_id = %request.holder_id,
            seats = request.seat_ids.len(),
            version = outcome.version,
            "Booking confirmed"
        );

        // 5. Fire-and-forget notification
        self.notify(BroadcastEvent {
            run_id: request.run_id,
            bookings: outcome.bookings.clone(),
            version: outcome.version,
        });

        Ok(outcome)
    }

    fn notify(&self, event: BroadcastEvent) {
        let hub = self.hub.clone();
        tokio::spawn(async move {
            let run_id = event.run_id.clone();
            let report = hub.publish(event).await;
            debug!(
                run_id = %run_id,
                delivered = report.delivered,
                dropped = report.dropped,
                "Booking event published"
            );
        });
    }
}
