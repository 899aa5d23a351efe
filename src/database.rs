use sqlx::{postgres::PgPoolOptions, Pool, Postgres};
use std::time::Duration;
use tracing::info;

use crate::config::DatabaseConfig;

/// Пул Postgres: схемы залов читаются отсюда, продажи пишутся сюда.
#[derive(Clone)]
pub struct Database {
    pub pool: Pool<Postgres>,
}

impl Database {
    pub async fn connect(url: &str, config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(url)
            .await?;

        info!("Database pool ready ({} connections max)", config.pool_size);
        Ok(Database { pool })
    }

    /// Создаёт таблицу `seats`, если её ещё нет.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Applying seat schema migrations...");
        sqlx::migrate!("./src/migrations").run(&self.pool).await?;
        info!("Seat schema is up to date");
        Ok(())
    }
}
