use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use eventu_seats::{
    app,
    arbiter::{ArbiterSettings, ReservationArbiter},
    clock::SystemClock,
    config::{Config, LogFormat, StoreBackend},
    database::Database,
    redis_client::RedisClient,
    services::{ReservationSweeper, SeatService},
    store::{demo_map, CachedSeatStore, InMemorySeatStore, PgSeatStore, SeatStore},
    AppState,
};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::new(&config.app.rust_log);
    let registry = tracing_subscriber::registry().with(filter);
    match config.app.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn build_store(config: &Config) -> anyhow::Result<Arc<dyn SeatStore>> {
    match config.seats.store {
        StoreBackend::Memory => {
            let store = InMemorySeatStore::new();
            if let Some(event_id) = config.seats.demo_event_id {
                store.insert(demo_map(event_id, 10, 20));
                info!("Demo hall loaded for event {}", event_id);
            }
            Ok(Arc::new(store))
        }
        StoreBackend::Postgres => {
            let url = config
                .database
                .url
                .as_deref()
                .context("DATABASE_URL must be set")?;
            let db = Database::connect(url, &config.database)
                .await
                .context("Failed to connect to database")?;
            info!("Database connected");
            db.run_migrations().await.context("Failed to run migrations")?;

            let pg: Arc<dyn SeatStore> = Arc::new(PgSeatStore::new(db));
            let Some(redis_url) = config.redis.url.as_deref() else {
                return Ok(pg);
            };
            let redis = match RedisClient::connect(redis_url).await {
                Ok(redis) => redis.ping().await.map(|_| redis),
                Err(e) => Err(e),
            };
            match redis {
                Ok(redis) => {
                    info!("Redis connected, seat maps are cached");
                    Ok(Arc::new(CachedSeatStore::new(redis, pg)))
                }
                Err(e) => {
                    // без кеша работаем напрямую с базой
                    warn!("Redis unavailable ({}), seat maps are read from Postgres", e);
                    Ok(pg)
                }
            }
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    init_tracing(&config);

    info!("Starting Eventu seat coordinator ({})", config.app.environment);

    let store = build_store(&config).await?;

    let ttl_secs = i64::try_from(config.seats.reservation_ttl_secs)
        .context("SEATS_RESERVATION_TTL_SECS does not fit into i64")?;
    let settings = ArbiterSettings {
        reservation_ttl: chrono::Duration::seconds(ttl_secs),
        channel_capacity: config.seats.broadcast_capacity,
    };
    let arbiter = Arc::new(ReservationArbiter::new(Arc::new(SystemClock), settings));
    let seats = Arc::new(SeatService::new(
        arbiter.clone(),
        store,
        config.seats.allow_client_occupy,
    ));

    if let Some(event_id) = config.seats.demo_event_id {
        // прогрев: первый клиент не ждёт загрузки схемы
        if let Err(e) = seats.layout(event_id).await {
            warn!("Failed to preload event {}: {}", event_id, e);
        }
    }

    // --- Start background tasks ---
    let sweeper = ReservationSweeper::new(
        arbiter,
        Duration::from_secs(config.seats.sweep_interval_secs),
    )
    .spawn();

    // --- Start the web server ---
    let addr: SocketAddr = format!("{}:{}", config.app.host, config.app.port)
        .parse()
        .context("HOST/PORT do not form a socket address")?;
    let state = AppState::new(seats, config);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    info!("Server stopped");
    Ok(())
}
