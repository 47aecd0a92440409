use async_trait::async_trait;
use chrono::Utc;
use coach_core::run::BookingLedger;
use coach_core::{ClaimOutcome, HolderId, RunId, RunSpec, ScheduleStore, SeatId, StoreError, StoreResult, VehicleRun};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

struct SlotState {
    ledger: BookingLedger,
    // Set when the slot is swapped out by `create_or_replace_run`. A claim that
    // raced the swap sees this and retries against the new slot.
    retired: bool,
}

/// One run. The spec is immutable and read without locking; only the
/// booking state sits behind the per-run mutex.
struct RunSlot {
    spec: RunSpec,
    state: Mutex<SlotState>,
}

impl RunSlot {
    fn new(spec: RunSpec, ledger: BookingLedger) -> Arc<Self> {
        Arc::new(Self {
            spec,
            state: Mutex::new(SlotState { ledger, retired: false }),
        })
    }
}

/// Single-node store. Claims serialize per run; claims on different runs
/// never wait on each other.
#[derive(Default)]
pub struct InMemoryScheduleStore {
    runs: RwLock<HashMap<RunId, Arc<RunSlot>>>,
}

impl InMemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, run_id: &RunId) -> StoreResult<Arc<RunSlot>> {
        self.runs
            .read()
            .await
            .get(run_id)
            .cloned()
            .ok_or_else(|| StoreError::RunNotFound(run_id.clone()))
    }
}

#[async_trait]
impl ScheduleStore for InMemoryScheduleStore {
    async fn get_run(&self, run_id: &RunId) -> StoreResult<VehicleRun> {
        loop {
            let slot = self.slot(run_id).await?;
            let state = slot.state.lock().await;
            if state.retired {
                continue;
            }
            return Ok(VehicleRun::from_parts(&slot.spec, &state.ledger));
        }
    }

    async fn run_exists(&self, run_id: &RunId) -> StoreResult<bool> {
        Ok(self.runs.read().await.contains_key(run_id))
    }

    async fn try_claim_seats(
        &self,
        run_id: &RunId,
        seat_ids: &BTreeSet<SeatId>,
        holder_id: &HolderId,
    ) -> StoreResult<ClaimOutcome> {
        loop {
            let slot = self.slot(run_id).await?;
            let mut state = slot.state.lock().await;
            if state.retired {
                continue;
            }

            return match state.ledger.claim(&slot.spec, seat_ids, holder_id, Utc::now()) {
                Ok(outcome) => {
                    info!(
                        run_id = %run_id,
                        holder_id = %holder_id,
                        seats = seat_ids.len(),
                        version = outcome.version,
                        "Seats claimed"
                    );
                    Ok(outcome)
                }
                Err(e) => {
                    debug!(run_id = %run_id, holder_id = %holder_id, error = %e, "Seat claim rejected");
                    Err(e)
                }
            };
        }
    }

    async fn create_or_replace_run(&self, spec: RunSpec) -> StoreResult<VehicleRun> {
        let mut runs = self.runs.write().await;

        let ledger = match runs.get(&spec.run_id) {
            Some(existing) => {
                let mut state = existing.state.lock().await;
                if existing.spec == spec {
                    debug!(run_id = %spec.run_id, "Run spec unchanged");
                    return Ok(VehicleRun::from_parts(&existing.spec, &state.ledger));
                }
                if !state.ledger.bookings.is_empty() {
                    return Err(StoreError::LayoutInUse(spec.run_id.clone()));
                }
                state.retired = true;
                // Keep the claim counter monotonic across replacements.
                BookingLedger { bookings: Default::default(), version: state.ledger.version }
            }
            None => BookingLedger::default(),
        };

        let run = VehicleRun::from_parts(&spec, &ledger);
        info!(run_id = %spec.run_id, seats = spec.layout.len(), "Run stored");
        runs.insert(spec.run_id.clone(), RunSlot::new(spec, ledger));
        Ok(run)
    }

    async fn list_runs(&self) -> StoreResult<Vec<VehicleRun>> {
        let slots: Vec<Arc<RunSlot>> = self.runs.read().await.values().cloned().collect();

        let mut runs = Vec::with_capacity(slots.len());
        for slot in slots {
            let state = slot.state.lock().await;
            if !state.retired {
                runs.push(VehicleRun::from_parts(&slot.spec, &state.ledger));
            }
        }
        runs.sort_by(|a, b| a.run_id.cmp(&b.run_id));
        Ok(runs)
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}
