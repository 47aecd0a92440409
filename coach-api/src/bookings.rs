use axum::{
    extract::{rejection::JsonRejection, Json, State},
    routing::post,
    Router,
};
use coach_core::{BookSeatsPayload, BookingMap, ClaimOutcome, ErrorKind, ReservationError};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::state::AppState;

/// `{ ok, bookings?, version?, error?, message? }`
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bookings: Option<BookingMap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl BookingResponse {
    pub fn success(outcome: ClaimOutcome) -> Self {
        Self {
            ok: true,
            bookings: Some(outcome.bookings),
            version: Some(outcome.version),
            error: None,
            message: None,
        }
    }

    pub fn failure(err: &ReservationError) -> Self {
        let message = match err {
            // Backend details stay in the logs.
            ReservationError::Internal(_) => "Internal Server Error".to_string(),
            other => other.to_string(),
        };
        Self {
            ok: false,
            bookings: None,
            version: None,
            error: Some(err.kind()),
            message: Some(message),
        }
    }
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/bookings", post(book_seats))
}

async fn book_seats(
    State(state): State<AppState>,
    payload: Result<Json<BookSeatsPayload>, JsonRejection>,
) -> Result<Json<BookingResponse>, AppError> {
    let Json(payload) = payload.map_err(|rejection| state.engine.reject_body(rejection.body_text()))?;
    let outcome = state.engine.book_seats(&payload).await?;
    Ok(Json(BookingResponse::success(outcome)))
}
