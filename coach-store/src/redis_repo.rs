use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coach_core::{
    BookingMap, ClaimOutcome, HolderId, RunId, RunSpec, ScheduleStore, SeatBookingRecord, SeatId, SeatState,
    StoreError, StoreResult, VehicleRun,
};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, error, info};

const RUN_INDEX_KEY: &str = "coach:runs";

/// Atomic check-and-claim for one run.
///
/// KEYS[1] = layout seat set
/// KEYS[2] = bookings hash (seat -> stored record)
/// KEYS[3] = claim counter
/// ARGV[1] = stored record JSON
/// ARGV[2..] = requested seats
///
/// Replies `{"not_found"}`, `{"unknown", seats...}`, `{"conflict", seats...}`
/// or `{"ok", version, seat, record, seat, record, ...}`.
const CLAIM_SCRIPT: &str = r#"
    if redis.call('EXISTS', KEYS[1]) == 0 then
        return {'not_found'}
    end

    local unknown = {}
    for i = 2, #ARGV do
        if redis.call('SISMEMBER', KEYS[1], ARGV[i]) == 0 then
            table.insert(unknown, ARGV[i])
        end
    end
    if #unknown > 0 then
        table.insert(unknown, 1, 'unknown')
        return unknown
    end

    local taken = {}
    for i = 2, #ARGV do
        if redis.call('HEXISTS', KEYS[2], ARGV[i]) == 1 then
            table.insert(taken, ARGV[i])
        end
    end
    if #taken > 0 then
        table.insert(taken, 1, 'conflict')
        return taken
    end

    for i = 2, #ARGV do
        redis.call('HSET', KEYS[2], ARGV[i], ARGV[1])
    end
    local version = redis.call('INCR', KEYS[3])

    local reply = {'ok', tostring(version)}
    local all = redis.call('HGETALL', KEYS[2])
    for i = 1, #all do
        table.insert(reply, all[i])
    end
    return reply
"#;

/// Atomic create-or-replace of a run's layout.
///
/// KEYS[1] = spec JSON
/// KEYS[2] = layout seat set
/// KEYS[3] = bookings hash
/// ARGV[1] = spec JSON
/// ARGV[2..] = layout seats
const REPLACE_SCRIPT: &str = r#"
    if redis.call('GET', KEYS[1]) == ARGV[1] then
        return 'unchanged'
    end
    if redis.call('HLEN', KEYS[3]) > 0 then
        return 'in_use'
    end

    redis.call('SET', KEYS[1], ARGV[1])
    redis.call('DEL', KEYS[2])
    for i = 2, #ARGV do
        redis.call('SADD', KEYS[2], ARGV[i])
    end
    return 'stored'
"#;

/// Value stored per booked seat; the seat id is the hash field.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredBooking {
    holder_id: HolderId,
    booked_at: DateTime<Utc>,
}

// The `{run}` hash tag keeps every key of one run on the same cluster slot,
// which the scripts need.
fn spec_key(run_id: &RunId) -> String {
    format!("coach:run:{{{}}}:spec", run_id)
}

fn seats_key(run_id: &RunId) -> String {
    format!("coach:run:{{{}}}:seats", run_id)
}

fn bookings_key(run_id: &RunId) -> String {
    format!("coach:run:{{{}}}:bookings", run_id)
}

fn version_key(run_id: &RunId) -> String {
    format!("coach:run:{{{}}}:version", run_id)
}

fn backend(e: redis::RedisError) -> StoreError {
    error!("Redis error: {}", e);
    StoreError::Backend(e.to_string())
}

fn corrupt(run_id: &RunId, what: impl std::fmt::Display) -> StoreError {
    error!(run_id = %run_id, "Corrupt run data: {}", what);
    StoreError::Backend(format!("corrupt data for run {}: {}", run_id, what))
}

fn decode_booking(run_id: &RunId, seat: &str, raw: &str) -> StoreResult<SeatBookingRecord> {
    let seat_id = SeatId::parse(seat).map_err(|e| corrupt(run_id, e))?;
    let stored: StoredBooking = serde_json::from_str(raw).map_err(|e| corrupt(run_id, e))?;
    Ok(SeatBookingRecord {
        seat_id,
        holder_id: stored.holder_id,
        state: SeatState::Booked,
        booked_at: stored.booked_at,
    })
}

/// Turns the claim script's reply into the store's result type.
fn decode_claim_reply(run_id: &RunId, reply: Vec<String>) -> StoreResult<ClaimOutcome> {
    let mut parts = reply.into_iter();
    let status = parts.next().ok_or_else(|| corrupt(run_id, "empty claim reply"))?;

    match status.as_str() {
        "ok" => {
            let version = parts
                .next()
                .and_then(|v| v.parse::<u64>().ok())
                .ok_or_else(|| corrupt(run_id, "claim reply without version"))?;

            let rest: Vec<String> = parts.collect();
            if rest.len() % 2 != 0 {
                return Err(corrupt(run_id, "odd booking field count"));
            }
            let mut bookings = BookingMap::new();
            for pair in rest.chunks(2) {
                let record = decode_booking(run_id, &pair[0], &pair[1])?;
                bookings.insert(record.seat_id, record.holder_id);
            }
            Ok(ClaimOutcome { bookings, version })
        }
        "not_found" => Err(StoreError::RunNotFound(run_id.clone())),
        "unknown" => Err(StoreError::UnknownSeat(parts.collect())),
        "conflict" => {
            let seats = parts
                .map(|s| SeatId::parse(s).map_err(|e| corrupt(run_id, e)))
                .collect::<StoreResult<Vec<_>>>()?;
            Err(StoreError::SeatConflict(seats))
        }
        other => Err(corrupt(run_id, format!("unexpected claim status {other:?}"))),
    }
}

fn assemble_run(
    run_id: &RunId,
    spec_json: Option<String>,
    raw_bookings: HashMap<String, String>,
    version: Option<u64>,
) -> StoreResult<VehicleRun> {
    let spec_json = spec_json.ok_or_else(|| StoreError::RunNotFound(run_id.clone()))?;
    let spec: RunSpec = serde_json::from_str(&spec_json).map_err(|e| corrupt(run_id, e))?;

    let mut bookings = BTreeMap::new();
    for (seat, raw) in &raw_bookings {
        let record = decode_booking(run_id, seat, raw)?;
        bookings.insert(record.seat_id.clone(), record);
    }

    Ok(VehicleRun {
        run_id: spec.run_id,
        vehicle_id: spec.vehicle_id,
        date: spec.date,
        layout: spec.layout,
        bookings,
        version: version.unwrap_or(0),
    })
}

/// Multi-node store. Each claim is a single Lua script, so the
/// check-and-claim is atomic on the Redis server.
#[derive(Clone)]
pub struct RedisScheduleStore {
    client: redis::Client,
}

impl RedisScheduleStore {
    pub async fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self { client })
    }

    async fn connection(&self) -> StoreResult<redis::aio::MultiplexedConnection> {
        self.client.get_multiplexed_async_connection().await.map_err(backend)
    }
}

#[async_trait]
impl ScheduleStore for RedisScheduleStore {
    async fn get_run(&self, run_id: &RunId) -> StoreResult<VehicleRun> {
        let mut conn = self.connection().await?;

        let (spec_json, raw_bookings, version): (Option<String>, HashMap<String, String>, Option<u64>) = redis::pipe()
            .atomic()
            .get(spec_key(run_id))
            .hgetall(bookings_key(run_id))
            .get(version_key(run_id))
            .query_async(&mut conn)
            .await
            .map_err(backend)?;

        assemble_run(run_id, spec_json, raw_bookings, version)
    }

    async fn run_exists(&self, run_id: &RunId) -> StoreResult<bool> {
        let mut conn = self.connection().await?;
        conn.exists::<_, bool>(spec_key(run_id)).await.map_err(backend)
    }

    async fn try_claim_seats(
        &self,
        run_id: &RunId,
        seat_ids: &BTreeSet<SeatId>,
        holder_id: &HolderId,
    ) -> StoreResult<ClaimOutcome> {
        let mut conn = self.connection().await?;

        let record = serde_json::to_string(&StoredBooking {
            holder_id: holder_id.clone(),
            booked_at: Utc::now(),
        })
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        let seats: Vec<&str> = seat_ids.iter().map(SeatId::as_str).collect();

        let reply: Vec<String> = redis::Script::new(CLAIM_SCRIPT)
            .key(seats_key(run_id))
            .key(bookings_key(run_id))
            .key(version_key(run_id))
            .arg(record)
            .arg(seats)
            .invoke_async(&mut conn)
            .await
            .map_err(backend)?;

        let outcome = decode_claim_reply(run_id, reply);
        match &outcome {
            Ok(claimed) => info!(
                run_id = %run_id,
                holder_id = %holder_id,
                seats = seat_ids.len(),
                version = claimed.version,
                "Seats claimed"
            ),
            Err(e) => debug!(run_id = %run_id, holder_id = %holder_id, error = %e, "Seat claim rejected"),
        }
        outcome
    }

    async fn create_or_replace_run(&self, spec: RunSpec) -> StoreResult<VehicleRun> {
        let mut conn = self.connection().await?;
        let run_id = spec.run_id.clone();

        let spec_json = serde_json::to_string(&spec).map_err(|e| StoreError::Backend(e.to_string()))?;
        let seats: Vec<&str> = spec.layout.iter().map(SeatId::as_str).collect();

        let status: String = redis::Script::new(REPLACE_SCRIPT)
            .key(spec_key(&run_id))
            .key(seats_key(&run_id))
            .key(bookings_key(&run_id))
            .arg(spec_json)
            .arg(seats)
            .invoke_async(&mut conn)
            .await
            .map_err(backend)?;

        match status.as_str() {
            "stored" | "unchanged" => {
                conn.sadd::<_, _, ()>(RUN_INDEX_KEY, run_id.as_str()).await.map_err(backend)?;
                info!(run_id = %run_id, seats = spec.layout.len(), status = %status, "Run stored");
                self.get_run(&run_id).await
            }
            "in_use" => Err(StoreError::LayoutInUse(run_id)),
            other => Err(corrupt(&run_id, format!("unexpected replace status {other:?}"))),
        }
    }

    async fn list_runs(&self) -> StoreResult<Vec<VehicleRun>> {
        let mut conn = self.connection().await?;
        let members: Vec<String> = conn.smembers(RUN_INDEX_KEY).await.map_err(backend)?;

        let mut ids: Vec<RunId> = members.into_iter().filter_map(|m| RunId::parse(m).ok()).collect();
        ids.sort();

        let mut runs = Vec::with_capacity(ids.len());
        for run_id in ids {
            runs.push(self.get_run(&run_id).await?);
        }
        Ok(runs)
    }

    async fn health_check(&self) -> StoreResult<()> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await.map_err(backend)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r1() -> RunId {
        RunId::parse("R1").unwrap()
    }

    fn stored(holder: &str) -> String {
        serde_json::to_string(&StoredBooking {
            holder_id: HolderId::parse(holder).unwrap(),
            booked_at: Utc::now(),
        })
        .unwrap()
    }

    fn strings(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn keys_share_a_hash_tag() {
        assert_eq!(spec_key(&r1()), "coach:run:{R1}:spec");
        assert_eq!(bookings_key(&r1()), "coach:run:{R1}:bookings");
    }

    #[test]
    fn decodes_successful_claim() {
        let x = stored("X");
        let reply = vec!["ok".to_string(), "3".to_string(), "S1".to_string(), x.clone(), "S2".to_string(), x];

        let outcome = decode_claim_reply(&r1(), reply).unwrap();
        assert_eq!(outcome.version, 3);
        assert_eq!(outcome.bookings.len(), 2);
        assert_eq!(outcome.bookings[&SeatId::parse("S2").unwrap()].as_str(), "X");
    }

    #[test]
    fn decodes_rejections() {
        assert_eq!(
            decode_claim_reply(&r1(), strings(&["not_found"])).unwrap_err(),
            StoreError::RunNotFound(r1())
        );
        assert_eq!(
            decode_claim_reply(&r1(), strings(&["unknown", "S9"])).unwrap_err(),
            StoreError::UnknownSeat(strings(&["S9"]))
        );
        assert_eq!(
            decode_claim_reply(&r1(), strings(&["conflict", "S2"])).unwrap_err(),
            StoreError::SeatConflict(vec![SeatId::parse("S2").unwrap()])
        );
    }

    #[test]
    fn malformed_replies_are_backend_errors() {
        assert!(matches!(decode_claim_reply(&r1(), vec![]), Err(StoreError::Backend(_))));
        assert!(matches!(
            decode_claim_reply(&r1(), strings(&["ok", "1", "S1"])),
            Err(StoreError::Backend(_))
        ));
        assert!(matches!(
            decode_claim_reply(&r1(), strings(&["ok", "1", "S1", "not json"])),
            Err(StoreError::Backend(_))
        ));
    }

    #[test]
    fn assembles_run_from_raw_parts() {
        let spec = RunSpec::new(r1(), None, None, vec![SeatId::parse("S1").unwrap(), SeatId::parse("S2").unwrap()]).unwrap();
        let mut raw = HashMap::new();
        raw.insert("S1".to_string(), stored("X"));

        let run = assemble_run(&r1(), Some(serde_json::to_string(&spec).unwrap()), raw, Some(1)).unwrap();
        assert_eq!(run.version, 1);
        assert_eq!(run.available_seats(), vec![SeatId::parse("S2").unwrap()]);

        assert_eq!(
            assemble_run(&r1(), None, HashMap::new(), None).unwrap_err(),
            StoreError::RunNotFound(r1())
        );
    }
}
