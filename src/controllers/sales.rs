use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use std::sync::Arc;
use tracing::info;

use crate::error::SeatError;
use crate::middleware::SalesCaller;
use crate::protocol::ActionResult;
use crate::services::SaleConfirmation;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/sales/confirm", post(confirm_sale))
}

// POST /api/sales/confirm - единственный легитимный триггер occupy
async fn confirm_sale(
    State(state): State<Arc<AppState>>,
    caller: SalesCaller,
    Json(req): Json<SaleConfirmation>,
) -> Result<impl IntoResponse, SeatError> {
    info!(
        "💳 Sale confirmation {} from {} for event {} ({} seats)",
        req.transaction_id,
        caller.name,
        req.event_id,
        req.seat_ids.len()
    );
    let outcome = state.seats.confirm_sale(req).await?;
    Ok((StatusCode::OK, Json(ActionResult::from_outcome(None, outcome))))
}
