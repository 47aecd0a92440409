use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Prometheus collectors for the booking path and the observer channel.
/// Each instance owns its registry, so tests can build as many as they like.
pub struct Metrics {
    registry: Registry,
    pub bookings: IntCounterVec,
    pub claim_duration: Histogram,
    pub observers: IntGauge,
    pub notifications_delivered: IntCounter,
    pub notifications_dropped: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let bookings = IntCounterVec::new(
            Opts::new("coach_bookings_total", "Booking requests by outcome"),
            &["outcome"],
        )?;
        let claim_duration = Histogram::with_opts(HistogramOpts::new(
            "coach_claim_duration_seconds",
            "Time spent in the store's atomic seat claim",
        ))?;
        let observers = IntGauge::new("coach_observers_connected", "Registered observer connections")?;
        let notifications_delivered = IntCounter::new(
            "coach_notifications_delivered_total",
            "Booking events queued to observers",
        )?;
        let notifications_dropped = IntCounter::new(
            "coach_notifications_dropped_total",
            "Observers dropped because delivery failed",
        )?;

        registry.register(Box::new(bookings.clone()))?;
        registry.register(Box::new(claim_duration.clone()))?;
        registry.register(Box::new(observers.clone()))?;
        registry.register(Box::new(notifications_delivered.clone()))?;
        registry.register(Box::new(notifications_dropped.clone()))?;

        Ok(Self {
            registry,
            bookings,
            claim_duration,
            observers,
            notifications_delivered,
            notifications_dropped,
        })
    }

    pub fn record_booking(&self, outcome: &str) {
        self.bookings.with_label_values(&[outcome]).inc();
    }

    /// Text exposition format for `/metrics`.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_registered_collectors() {
        let metrics = Metrics::new().unwrap();
        metrics.record_booking("ok");
        metrics.record_booking("SeatConflict");
        metrics.observers.set(2);

        let text = metrics.render().unwrap();
        assert!(text.contains("coach_bookings_total{outcome=\"ok\"} 1"));
        assert!(text.contains("coach_bookings_total{outcome=\"SeatConflict\"} 1"));
        assert!(text.contains("coach_observers_connected 2"));
    }
}
