use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

use crate::error::SeatError;
use crate::models::{EventId, SeatId};
use crate::protocol::ActionResult;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/events/{event_id}/seats", get(get_seats))
        .route("/events/{event_id}/layout", get(get_layout))
        .route("/events/{event_id}/availability", get(get_availability))
        .route("/events/{event_id}/seats/reserve", post(reserve_seats))
        .route("/events/{event_id}/seats/release", post(release_seats))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct SeatIntentRequest {
    #[validate(length(min = 1, max = 100))]
    seat_ids: Vec<SeatId>,
    #[validate(length(min = 1, max = 128))]
    user_id: String,
}

fn validate(req: &SeatIntentRequest) -> Result<(), SeatError> {
    req.validate().map_err(|e| SeatError::Validation(e.to_string()))
}

// GET /api/events/{event_id}/seats
async fn get_seats(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<EventId>,
) -> Result<impl IntoResponse, SeatError> {
    let snapshot = state.seats.snapshot(event_id).await?;
    Ok((StatusCode::OK, Json(snapshot)))
}

// GET /api/events/{event_id}/layout
async fn get_layout(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<EventId>,
) -> Result<impl IntoResponse, SeatError> {
    let map = state.seats.layout(event_id).await?;
    Ok((StatusCode::OK, Json(map.as_ref().clone())))
}

// GET /api/events/{event_id}/availability
async fn get_availability(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<EventId>,
) -> Result<impl IntoResponse, SeatError> {
    let availability = state.seats.availability(event_id).await?;
    Ok((StatusCode::OK, Json(availability)))
}

// POST /api/events/{event_id}/seats/reserve
async fn reserve_seats(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<EventId>,
    Json(req): Json<SeatIntentRequest>,
) -> Result<impl IntoResponse, SeatError> {
    validate(&req)?;
    let outcome = state.seats.reserve(event_id, &req.seat_ids, &req.user_id).await?;
    Ok((StatusCode::OK, Json(ActionResult::from_outcome(None, outcome))))
}

// POST /api/events/{event_id}/seats/release
async fn release_seats(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<EventId>,
    Json(req): Json<SeatIntentRequest>,
) -> Result<impl IntoResponse, SeatError> {
    validate(&req)?;
    let outcome = state.seats.release(event_id, &req.seat_ids, &req.user_id).await?;
    Ok((StatusCode::OK, Json(ActionResult::from_outcome(None, outcome))))
}
