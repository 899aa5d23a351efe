use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::models::{EventId, SeatId};

/// Ошибки слоя хранения схемы зала и продаж.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("event {0} has no seat map")]
    NotFound(EventId),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("sale {transaction_id}: {written} of {expected} seats written")]
    PartialSale {
        transaction_id: String,
        written: u64,
        expected: usize,
    },
}

/// Отказ запроса целиком. Конфликты по отдельным местам сюда не попадают:
/// они возвращаются как данные в `BatchOutcome`.
#[derive(Error, Debug)]
pub enum SeatError {
    #[error("unknown event {0}")]
    UnknownEvent(EventId),

    #[error("seat list is empty")]
    EmptySeatList,

    #[error("seats not in event {event_id}: {}", format_seats(.seats))]
    UnknownSeats { event_id: EventId, seats: Vec<SeatId> },

    #[error("malformed user id: {0}")]
    InvalidUser(String),

    #[error("no event joined; send joinEvent or include eventId")]
    MissingEvent,

    #[error("occupy is only accepted from the sale confirmation endpoint")]
    OccupyNotAllowed,

    #[error("transaction id is empty")]
    EmptyTransaction,

    #[error("invalid request: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for SeatError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(event_id) => SeatError::UnknownEvent(event_id),
            other => SeatError::Store(other),
        }
    }
}

fn format_seats(seats: &[SeatId]) -> String {
    seats.iter().map(SeatId::as_str).collect::<Vec<_>>().join(", ")
}

impl SeatError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            SeatError::UnknownEvent(_) => StatusCode::NOT_FOUND,
            SeatError::EmptySeatList
            | SeatError::UnknownSeats { .. }
            | SeatError::InvalidUser(_)
            | SeatError::MissingEvent
            | SeatError::EmptyTransaction
            | SeatError::Validation(_) => StatusCode::BAD_REQUEST,
            SeatError::OccupyNotAllowed => StatusCode::FORBIDDEN,
            SeatError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for SeatError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("request failed: {}", self);
        }
        (status, Json(json!({ "success": false, "error": self.to_string() }))).into_response()
    }
}
