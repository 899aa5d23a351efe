pub mod sales;
pub mod seats;
pub mod ws;

use axum::Router;
use std::sync::Arc;

pub fn routes() -> Router<Arc<crate::AppState>> {
    Router::new()
        .merge(seats::routes())
        .merge(sales::routes())
        .merge(ws::routes())
}
