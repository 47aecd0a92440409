use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use coach_api::bookings::BookingResponse;
use coach_api::runs::RunResponse;
use coach_api::{app, AppState};
use coach_api::hub::ObserverState;
use coach_core::ErrorKind;
use coach_store::InMemoryScheduleStore;
use futures_util::StreamExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tower::ServiceExt;
use uuid::Uuid;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn test_state() -> AppState {
    AppState::new(Arc::new(InMemoryScheduleStore::new()), Duration::from_secs(2), 16).unwrap()
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

async fn create_r1(router: &Router) {
    let (status, _) = send(
        router,
        "PUT",
        "/v1/runs/R1",
        Some(json!({ "seatIds": ["S1", "S2", "S3"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

async fn book(router: &Router, seats: &[&str], holder: &str) -> (StatusCode, BookingResponse) {
    let (status, body) = send(
        router,
        "POST",
        "/v1/bookings",
        Some(json!({ "runId": "R1", "seatIds": seats, "holderId": holder })),
    )
    .await;
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_booking_then_conflict() {
    let router = app(test_state());
    create_r1(&router).await;

    let (status, first) = book(&router, &["S1", "S2"], "X").await;
    assert_eq!(status, StatusCode::OK);
    assert!(first.ok);
    assert_eq!(first.version, Some(1));
    let bookings = serde_json::to_value(first.bookings.unwrap()).unwrap();
    assert_eq!(bookings, json!({ "S1": "X", "S2": "X" }));

    let (status, second) = book(&router, &["S2", "S3"], "Y").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(!second.ok);
    assert_eq!(second.error, Some(ErrorKind::SeatConflict));
    assert!(second.bookings.is_none());

    let (status, body) = send(&router, "GET", "/v1/runs/R1", None).await;
    assert_eq!(status, StatusCode::OK);
    let run: RunResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(serde_json::to_value(&run.bookings).unwrap(), json!({ "S1": "X", "S2": "X" }));
    assert_eq!(run.available.len(), 1);
}

#[tokio::test]
async fn test_booking_errors_map_to_status_codes() {
    let router = app(test_state());
    create_r1(&router).await;

    let (status, reply) = book(&router, &["S9"], "X").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.error, Some(ErrorKind::UnknownSeat));

    let (status, reply) = book(&router, &[], "X").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.error, Some(ErrorKind::EmptyRequest));

    let (status, reply) = book(&router, &["S1"], "not valid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.error, Some(ErrorKind::InvalidReference));

    let (status, body) = send(
        &router,
        "POST",
        "/v1/bookings",
        Some(json!({ "runId": "R404", "seatIds": ["S1"], "holderId": "X" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let reply: BookingResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(reply.error, Some(ErrorKind::RunNotFound));
}

#[tokio::test]
async fn test_booked_run_layout_cannot_change() {
    let router = app(test_state());
    create_r1(&router).await;
    book(&router, &["S1"], "X").await;

    let (status, _) = send(&router, "PUT", "/v1/runs/R1", Some(json!({ "seatIds": ["A1"] }))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(&router, "PUT", "/v1/runs/R2", Some(json!({ "seatIds": [] }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_vehicle_schedules() {
    let router = app(test_state());

    let (status, body) = send(
        &router,
        "POST",
        "/v1/vehicles/NB-1234/runs",
        Some(json!({ "dates": ["2026-03-01", "2026-03-02"], "seatIds": ["R-0-0", "R-0-1"] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let created: Vec<RunResponse> = serde_json::from_slice(&body).unwrap();
    assert_eq!(created.len(), 2);
    assert_eq!(created[0].run_id.as_str(), "NB-1234:2026-03-01");

    let (status, body) = send(&router, "GET", "/v1/runs", None).await;
    assert_eq!(status, StatusCode::OK);
    let runs: Vec<RunResponse> = serde_json::from_slice(&body).unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[1].date.unwrap().to_string(), "2026-03-02");
}

#[tokio::test]
async fn test_observer_sees_booking_made_over_http() {
    let state = test_state();
    let mut observer = state.hub.subscribe(None).await;
    let router = app(state);
    create_r1(&router).await;

    let (status, _) = book(&router, &["S1"], "X").await;
    assert_eq!(status, StatusCode::OK);

    let event = tokio::time::timeout(Duration::from_secs(1), observer.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        serde_json::to_value(&*event).unwrap(),
        json!({ "runId": "R1", "bookings": { "S1": "X" }, "version": 1 })
    );
}

#[tokio::test]
async fn test_health_and_metrics() {
    let router = app(test_state());
    create_r1(&router).await;
    book(&router, &["S1"], "X").await;
    book(&router, &["S1"], "Y").await;

    let (status, _) = send(&router, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&router, "GET", "/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("coach_bookings_total{outcome=\"ok\"} 1"));
    assert!(text.contains("coach_bookings_total{outcome=\"SeatConflict\"} 1"));
}

#[tokio::test]
async fn test_mistyped_booking_body_gets_booking_envelope() {
    let router = app(test_state());
    create_r1(&router).await;

    let bodies = [
        json!({ "runId": null, "seatIds": ["S1"], "holderId": "X" }),
        json!({ "runId": 123, "seatIds": ["S1"], "holderId": "X" }),
        json!({ "runId": "R1", "seatIds": "S1", "holderId": "X" }),
    ];
    for body in bodies {
        let (status, bytes) = send(&router, "POST", "/v1/bookings", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let reply: BookingResponse = serde_json::from_slice(&bytes).unwrap();
        assert!(!reply.ok);
        assert_eq!(reply.error, Some(ErrorKind::InvalidReference));
    }

    let (_, body) = send(&router, "GET", "/metrics", None).await;
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("coach_bookings_total{outcome=\"InvalidReference\"} 3"));
}

#[tokio::test]
async fn test_schedules_are_not_half_applied() {
    let router = app(test_state());
    let (status, _) = send(
        &router,
        "POST",
        "/v1/vehicles/V1/runs",
        Some(json!({ "dates": ["2026-03-02"], "seatIds": ["S1", "S2"] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = send(
        &router,
        "POST",
        "/v1/bookings",
        Some(json!({ "runId": "V1:2026-03-02", "seatIds": ["S1"], "holderId": "X" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &router,
        "POST",
        "/v1/vehicles/V1/runs",
        Some(json!({ "dates": ["2026-03-01", "2026-03-02"], "seatIds": ["A1", "A2"] })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, body) = send(&router, "GET", "/v1/runs", None).await;
    let runs: Vec<RunResponse> = serde_json::from_slice(&body).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].run_id.as_str(), "V1:2026-03-02");

    // Re-sending the stored layout is accepted and adds the new date.
    let (status, _) = send(
        &router,
        "POST",
        "/v1/vehicles/V1/runs",
        Some(json!({ "dates": ["2026-03-01", "2026-03-02"], "seatIds": ["S1", "S2"] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

async fn next_json(client: &mut Client) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .expect("no frame within 2s")
            .expect("stream ended")
            .unwrap();
        match frame {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_stream_relays_events_and_forgets_closed_observers() {
    let state = test_state();
    let hub = state.hub.clone();
    let router = app(state);
    create_r1(&router).await;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = router.clone();
    tokio::spawn(async move {
        axum::serve(listener, server).await.unwrap();
    });

    let (mut client, _) = connect_async(format!("ws://{}/v1/stream", addr)).await.unwrap();
    let connected = next_json(&mut client).await;
    assert_eq!(connected["type"], "connected");
    let observer_id = Uuid::parse_str(connected["observerId"].as_str().unwrap()).unwrap();

    // The server opens the observer right after the connected frame.
    tokio::time::timeout(Duration::from_secs(2), async {
        while hub.state(observer_id).await != ObserverState::Open {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let (status, _) = book(&router, &["S1", "S2"], "X").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        next_json(&mut client).await,
        json!({ "runId": "R1", "bookings": { "S1": "X", "S2": "X" }, "version": 1 })
    );

    client.close(None).await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), async {
        while hub.observer_count().await != 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(hub.state(observer_id).await, ObserverState::Closed);
}
