use coach_core::ScheduleStore;
use std::sync::Arc;
use std::time::Duration;

use crate::engine::ReservationEngine;
use crate::hub::NotificationHub;
use crate::metrics::Metrics;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ScheduleStore>,
    pub engine: Arc<ReservationEngine>,
    pub hub: Arc<NotificationHub>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn ScheduleStore>,
        claim_timeout: Duration,
        observer_buffer: usize,
    ) -> Result<Self, prometheus::Error> {
        let metrics = Arc::new(Metrics::new()?);
        let hub = Arc::new(NotificationHub::new(observer_buffer, metrics.clone()));
        let engine = Arc::new(ReservationEngine::new(
            store.clone(),
            hub.clone(),
            metrics.clone(),
            claim_timeout,
        ));

        Ok(Self { store, engine, hub, metrics })
    }
}
