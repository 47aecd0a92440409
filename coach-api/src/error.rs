use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use coach_core::{ErrorKind, ReservationError, StoreError};
use serde_json::json;

use crate::bookings::BookingResponse;

#[derive(Debug)]
pub enum AppError {
    Reservation(ReservationError),
    Store(StoreError),
    ValidationError(String),
    InternalServerError(String),
}

pub fn reservation_status(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidReference | ErrorKind::EmptyRequest | ErrorKind::UnknownSeat => StatusCode::BAD_REQUEST,
        ErrorKind::RunNotFound => StatusCode::NOT_FOUND,
        ErrorKind::SeatConflict => StatusCode::CONFLICT,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            // Booking failures keep the booking reply shape.
            AppError::Reservation(err) => {
                let status = reservation_status(err.kind());
                return (status, Json(BookingResponse::failure(&err))).into_response();
            }
            AppError::Store(err) => match err {
                StoreError::RunNotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
                StoreError::UnknownSeat(_) | StoreError::InvalidLayout(_) => (StatusCode::BAD_REQUEST, err.to_string()),
                StoreError::SeatConflict(_) | StoreError::LayoutInUse(_) => (StatusCode::CONFLICT, err.to_string()),
                StoreError::Backend(msg) => {
                    tracing::error!("Store backend error: {}", msg);
                    (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
                }
            },
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<ReservationError> for AppError {
    fn from(err: ReservationError) -> Self {
        Self::Reservation(err)
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}
