//! Environment configuration.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::courier::{pathao, steadfast, PathaoConfig, SteadfastConfig};
use crate::dispatch::DEFAULT_BULK_CONCURRENCY;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub nats_url: Option<String>,
    pub courier_timeout: Duration,
    pub courier_retry_attempts: u32,
    pub default_item_weight_kg: Decimal,
    pub bulk_concurrency: usize,
    pub pathao: Option<PathaoConfig>,
    pub steadfast: Option<SteadfastConfig>,
}

impl Config {
    /// Reads the process environment. Call `dotenvy::dotenv()` first to pick up `.env`.
    pub fn from_env() -> Result<Self, ConfigError> { Self::from_lookup(|name| env::var(name).ok()) }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let courier_timeout = Duration::from_secs(parse(&var, "COURIER_HTTP_TIMEOUT_SECS", 30u64)?);

        let pathao = match (var("PATHAO_CLIENT_ID"), var("PATHAO_CLIENT_SECRET"), var("PATHAO_USERNAME"), var("PATHAO_PASSWORD")) {
            (Some(client_id), Some(client_secret), Some(username), Some(password)) => Some(PathaoConfig {
                base_url: var("PATHAO_BASE_URL").unwrap_or_else(|| pathao::DEFAULT_BASE_URL.to_string()),
                client_id, client_secret, username, password,
                store_id: parse(&var, "PATHAO_STORE_ID", 0u64)?,
                timeout: courier_timeout,
            }),
            _ => None,
        };
        let steadfast = match (var("STEADFAST_API_KEY"), var("STEADFAST_SECRET_KEY")) {
            (Some(api_key), Some(secret_key)) => Some(SteadfastConfig {
                base_url: var("STEADFAST_BASE_URL").unwrap_or_else(|| steadfast::DEFAULT_BASE_URL.to_string()),
                api_key, secret_key, timeout: courier_timeout,
            }),
            _ => None,
        };

        Ok(Self {
            port: parse(&var, "PORT", 8083u16)?,
            database_url: var("DATABASE_URL"),
            database_max_connections: parse(&var, "DATABASE_MAX_CONNECTIONS", 10u32)?,
            nats_url: var("NATS_URL"),
            courier_timeout,
            courier_retry_attempts: parse(&var, "COURIER_RETRY_ATTEMPTS", 3u32)?.max(1),
            default_item_weight_kg: parse(&var, "DEFAULT_ITEM_WEIGHT_KG", Decimal::new(5, 1))?,
            bulk_concurrency: parse(&var, "BULK_DISPATCH_CONCURRENCY", DEFAULT_BULK_CONCURRENCY)?.max(1),
            pathao,
            steadfast,
        })
    }
}

fn parse<T: FromStr>(var: &impl Fn(&str) -> Option<String>, name: &'static str, default: T) -> Result<T, ConfigError> {
    match var(name) {
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}
