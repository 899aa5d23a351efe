use serde::Deserialize;
use std::env;
use std::str::FromStr;
use thiserror::Error;

/// Резерв дольше суток держит место мёртвым, такой TTL считается опечаткой.
pub const MAX_RESERVATION_TTL_SECS: u64 = 24 * 60 * 60;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

// Главная структура конфигурации - контейнер для всех настроек
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub seats: SeatsConfig,
    pub sales: SalesConfig,
}

// Настройки приложения
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("expected text or json, got {}", other)),
        }
    }
}

// Настройки базы данных
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub pool_size: u32,
    pub acquire_timeout_secs: u64,
}

// Настройки Redis; без URL кеш схем залов выключен
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: Option<String>,
}

/// Откуда брать схемы залов.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "pg" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(format!("expected postgres or memory, got {}", other)),
        }
    }
}

// Настройки координатора мест
#[derive(Debug, Clone, Deserialize)]
pub struct SeatsConfig {
    pub store: StoreBackend,
    pub reservation_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub broadcast_capacity: usize,
    pub allow_client_occupy: bool,
    /// Событие, которое заполняется демо-залом при `store = memory`.
    pub demo_event_id: Option<i64>,
}

// Учётка, с которой платёжная подсистема присылает подтверждения продаж
#[derive(Debug, Clone, Deserialize)]
pub struct SalesConfig {
    pub webhook_user: String,
    pub webhook_password: String,
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
{
    match lookup(name) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
            value,
        }),
    }
}

fn parse_opt<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
{
    match lookup(name) {
        None => Ok(None),
        Some(value) => value.trim().parse().map(Some).map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
            value,
        }),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Собирает конфигурацию из произвольного источника переменных.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        let seats = SeatsConfig {
            store: parse_or(&lookup, "SEATS_STORE", StoreBackend::Postgres)?,
            reservation_ttl_secs: parse_or(&lookup, "SEATS_RESERVATION_TTL_SECS", 900)?,
            sweep_interval_secs: parse_or(&lookup, "SEATS_SWEEP_INTERVAL_SECS", 30)?,
            broadcast_capacity: parse_or(&lookup, "SEATS_BROADCAST_CAPACITY", 1024)?,
            allow_client_occupy: parse_or(&lookup, "SEATS_ALLOW_CLIENT_OCCUPY", false)?,
            demo_event_id: parse_opt(&lookup, "SEATS_DEMO_EVENT_ID")?,
        };

        if seats.reservation_ttl_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "SEATS_RESERVATION_TTL_SECS",
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if seats.reservation_ttl_secs > MAX_RESERVATION_TTL_SECS {
            return Err(ConfigError::Invalid {
                name: "SEATS_RESERVATION_TTL_SECS",
                value: seats.reservation_ttl_secs.to_string(),
                reason: format!("must not exceed {} seconds", MAX_RESERVATION_TTL_SECS),
            });
        }
        if seats.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "SEATS_SWEEP_INTERVAL_SECS",
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }

        let database = DatabaseConfig {
            url: lookup("DATABASE_URL"),
            pool_size: parse_or(&lookup, "DB_POOL_SIZE", 20)?,
            acquire_timeout_secs: parse_or(&lookup, "DB_ACQUIRE_TIMEOUT_SECS", 5)?,
        };
        if seats.store == StoreBackend::Postgres && database.url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        Ok(Config {
            app: AppConfig {
                host: var("HOST", "0.0.0.0"),
                port: parse_or(&lookup, "PORT", 8000)?,
                environment: var("ENVIRONMENT", "development"),
                rust_log: var("RUST_LOG", "eventu_seats=debug,seat_audit=info,tower_http=debug"),
                log_format: parse_or(&lookup, "LOG_FORMAT", LogFormat::Text)?,
            },
            database,
            redis: RedisConfig {
                url: lookup("REDIS_URL"),
            },
            seats,
            sales: SalesConfig {
                webhook_user: lookup("SALES_WEBHOOK_USER")
                    .ok_or(ConfigError::Missing("SALES_WEBHOOK_USER"))?,
                webhook_password: lookup("SALES_WEBHOOK_PASSWORD")
                    .ok_or(ConfigError::Missing("SALES_WEBHOOK_PASSWORD"))?,
            },
        })
    }
}
