pub mod arbiter;
pub mod broadcast;
pub mod client;
pub mod clock;
pub mod config;
pub mod controllers;
pub mod database;
pub mod error;
pub mod middleware;
pub mod models;
pub mod protocol;
pub mod redis_client;
pub mod services;
pub mod store;

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use services::SeatService;

// Shared state для всего приложения
#[derive(Clone)]
pub struct AppState {
    pub seats: Arc<SeatService>,
    pub config: config::Config,
}

impl AppState {
    pub fn new(seats: Arc<SeatService>, config: config::Config) -> Arc<Self> {
        Arc::new(Self { seats, config })
    }
}

/// Главный роутер: REST и WebSocket под `/api`.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Eventu seat coordinator" }))
        .route("/health", get(|| async { "OK" }))
        .nest("/api", controllers::routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
