//! Fan-out of booking events to live observer connections.
//!
//! Every observer owns a bounded queue. `publish` only ever does a
//! non-blocking `try_send` per observer, so a slow or dead peer cannot hold
//! up the others or the booking that triggered the event. An observer whose
//! queue is full or closed is removed inside the same `publish` call.

use coach_core::{BroadcastEvent, RunId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::metrics::Metrics;

pub type ObserverId = Uuid;

/// `Closed` is not stored: an observer that is not in the set is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverState {
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("observer {0} is not keeping up")]
    Lagging(ObserverId),

    #[error("observer {0} has disconnected")]
    Disconnected(ObserverId),
}

struct ObserverSlot {
    state: ObserverState,
    filter: Option<RunId>,
    tx: mpsc::Sender<Arc<BroadcastEvent>>,
}

impl ObserverSlot {
    fn wants(&self, event: &BroadcastEvent) -> bool {
        self.state == ObserverState::Open
            && self.filter.as_ref().map_or(true, |run_id| *run_id == event.run_id)
    }
}

/// Receiving end given to the transport for one observer.
pub struct ObserverHandle {
    id: ObserverId,
    rx: mpsc::Receiver<Arc<BroadcastEvent>>,
}

impl ObserverHandle {
    pub fn id(&self) -> ObserverId {
        self.id
    }

    /// `None` once the hub has dropped this observer.
    pub async fn recv(&mut self) -> Option<Arc<BroadcastEvent>> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Arc<BroadcastEvent>> {
        self.rx.try_recv().ok()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub dropped: usize,
}

pub struct NotificationHub {
    observers: RwLock<HashMap<ObserverId, ObserverSlot>>,
    buffer: usize,
    metrics: Arc<Metrics>,
}

impl NotificationHub {
    pub fn new(buffer: usize, metrics: Arc<Metrics>) -> Self {
        Self {
            observers: RwLock::new(HashMap::new()),
            buffer: buffer.max(1),
            metrics,
        }
    }

    /// Adds an observer in `Connecting`; it receives nothing until `open`.
    /// `filter = None` receives every run's events.
    pub async fn register(&self, filter: Option<RunId>) -> ObserverHandle {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = Uuid::new_v4();

        let mut observers = self.observers.write().await;
        observers.insert(
            id,
            ObserverSlot {
                state: ObserverState::Connecting,
                filter,
                tx,
            },
        );
        self.metrics.observers.set(observers.len() as i64);
        debug!(observer_id = %id, "Observer registered");

        ObserverHandle { id, rx }
    }

    /// `Connecting -> Open`. Returns false if the observer is already gone.
    pub async fn open(&self, id: ObserverId) -> bool {
        match self.observers.write().await.get_mut(&id) {
            Some(slot) => {
                slot.state = ObserverState::Open;
                info!(observer_id = %id, filter = ?slot.filter, "Observer open");
                true
            }
            None => false,
        }
    }

    pub async fn subscribe(&self, filter: Option<RunId>) -> ObserverHandle {
        let handle = self.register(filter).await;
        self.open(handle.id).await;
        handle
    }

    /// Idempotent; returns whether the observer was still registered.
    pub async fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write().await;
        let removed = observers.remove(&id).is_some();
        self.metrics.observers.set(observers.len() as i64);
        if removed {
            info!(observer_id = %id, "Observer closed");
        }
        removed
    }

    pub async fn state(&self, id: ObserverId) -> ObserverState {
        self.observers
            .read()
            .await
            .get(&id)
            .map_or(ObserverState::Closed, |slot| slot.state)
    }

    pub async fn observer_count(&self) -> usize {
        self.observers.read().await.len()
    }

    /// Queues the event for every open observer that wants it.
    ///
    /// Holding the write lock makes publishes, registrations and removals
    /// mutually ordered; nothing inside awaits on an observer.
    pub async fn publish(&self, event: BroadcastEvent) -> PublishReport {
        let event = Arc::new(event);
        let mut report = PublishReport::default();
        let mut failures = Vec::new();

        let mut observers = self.observers.write().await;
        observers.retain(|id, slot| {
            if !slot.wants(&event) {
                return true;
            }
            match slot.tx.try_send(event.clone()) {
                Ok(()) => {
                    report.delivered += 1;
                    true
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    failures.push(NotificationError::Lagging(*id));
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    failures.push(NotificationError::Disconnected(*id));
                    false
                }
            }
        });
        self.metrics.observers.set(observers.len() as i64);
        drop(observers);

        report.dropped = failures.len();
        for failure in &failures {
            warn!(run_id = %event.run_id, "Notification failure, observer dropped: {}", failure);
        }
        self.metrics.notifications_delivered.inc_by(report.delivered as u64);
        self.metrics.notifications_dropped.inc_by(report.dropped as u64);

        report
    }
}
