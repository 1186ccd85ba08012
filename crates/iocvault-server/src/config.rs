//! Process configuration from environment variables.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `SERVER_ADDR` | `0.0.0.0:8080` |
//! | `SERVER_PORT` | port of `SERVER_ADDR`, as `8080` or `:8080` |
//! | `BROKER_ADDR` | `localhost:9092` |
//! | `TOPIC` | `ioc.normalized.queue` |
//! | `BROKER_GROUP_ID` | `iocvault` |
//! | `BATCH_SIZE` | `100` |
//! | `DB_HOST` / `DB_PORT` | `localhost` / `5432` |
//! | `DB_USER` / `DB_PASSWORD` | `user` / `password` |
//! | `DB_NAME` | `app_db` |
//! | `DB_MAX_CONNECTIONS` | `20` |
//! | `STORAGE_BACKEND` | `postgres` (`memory` keeps records in process) |
//! | `WORKER_POOL_SIZE` | `10` |
//! | `TASK_QUEUE_CAPACITY` | `100` |
//! | `SHUTDOWN_TIMEOUT_SECS` | `30` |
//! | `LOG_LEVEL` | `info` |
//! | `LOG_FORMAT` | `pretty` (`json` for structured output) |
//!
//! `SERVER_ADDR` wins when both it and `SERVER_PORT` are set.
//!
//! Every variable is optional. A value that is present but does not parse
//! is a [`ConfigError`]; it is never silently replaced by the default.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use iocvault_ingest::BrokerConfig;
use iocvault_storage::PostgresConfig;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::pool::PoolConfig;
use crate::shutdown::DEFAULT_SHUTDOWN_TIMEOUT;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Postgres,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown storage backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server_addr: SocketAddr,
    pub broker: BrokerConfig,
    pub backend: StorageBackend,
    pub postgres: PostgresConfig,
    pub pool: PoolConfig,
    pub shutdown_timeout: Duration,
    pub log: LogConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            broker: BrokerConfig::default(),
            backend: StorageBackend::Postgres,
            postgres: PostgresConfig::default(),
            pool: PoolConfig::default(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            log: LogConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);
        let mut config = AppConfig::default();

        let mut port = ListenPort(config.server_addr.port());
        vars.parse("SERVER_PORT", &mut port)?;
        config.server_addr.set_port(port.0);
        vars.parse("SERVER_ADDR", &mut config.server_addr)?;

        vars.string("BROKER_ADDR", &mut config.broker.address);
        vars.string("TOPIC", &mut config.broker.topic);
        vars.string("BROKER_GROUP_ID", &mut config.broker.group_id);
        vars.parse("BATCH_SIZE", &mut config.broker.batch_size)?;

        vars.parse("STORAGE_BACKEND", &mut config.backend)?;
        vars.string("DB_HOST", &mut config.postgres.host);
        vars.parse("DB_PORT", &mut config.postgres.port)?;
        vars.string("DB_USER", &mut config.postgres.user);
        vars.string("DB_PASSWORD", &mut config.postgres.password);
        vars.string("DB_NAME", &mut config.postgres.database);
        vars.parse("DB_MAX_CONNECTIONS", &mut config.postgres.max_connections)?;

        vars.parse("WORKER_POOL_SIZE", &mut config.pool.workers)?;
        vars.parse("TASK_QUEUE_CAPACITY", &mut config.pool.queue_capacity)?;

        let mut timeout_secs = config.shutdown_timeout.as_secs();
        vars.parse("SHUTDOWN_TIMEOUT_SECS", &mut timeout_secs)?;
        config.shutdown_timeout = Duration::from_secs(timeout_secs);

        vars.string("LOG_LEVEL", &mut config.log.level);
        vars.parse("LOG_FORMAT", &mut config.log.format)?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("BATCH_SIZE", self.broker.batch_size),
            ("WORKER_POOL_SIZE", self.pool.workers),
            ("TASK_QUEUE_CAPACITY", self.pool.queue_capacity),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError {
                    name,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// A bare port, with or without the leading colon of a Go-style listen address.
struct ListenPort(u16);

impl FromStr for ListenPort {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix(':').unwrap_or(s).parse().map(ListenPort)
    }
}

struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn string(&self, name: &str, slot: &mut String) {
        if let Some(value) = self.get(name) {
            *slot = value;
        }
    }

    fn parse<T>(&self, name: &'static str, slot: &mut T) -> Result<(), ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        if let Some(value) = self.get(name) {
            *slot = value.parse().map_err(|e: T::Err| ConfigError {
                name,
                reason: format!("'{}': {}", value, e),
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults_without_environment() {
        let config = config_from(&[]).unwrap();

        assert_eq!(config.server_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.broker.address, "localhost:9092");
        assert_eq!(config.broker.topic, "ioc.normalized.queue");
        assert_eq!(config.broker.batch_size, 100);
        assert_eq!(config.backend, StorageBackend::Postgres);
        assert_eq!(config.postgres.port, 5432);
        assert_eq!(config.postgres.database, "app_db");
        assert_eq!(config.pool.workers, 10);
        assert_eq!(config.pool.queue_capacity, 100);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
        assert_eq!(config.log.format, LogFormat::Pretty);
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("SERVER_ADDR", "127.0.0.1:9000"),
            ("BROKER_ADDR", "kafka:29092"),
            ("TOPIC", "iocs"),
            ("BATCH_SIZE", "25"),
            ("STORAGE_BACKEND", "Memory"),
            ("DB_HOST", "db.internal"),
            ("DB_MAX_CONNECTIONS", "4"),
            ("WORKER_POOL_SIZE", "3"),
            ("TASK_QUEUE_CAPACITY", "7"),
            ("SHUTDOWN_TIMEOUT_SECS", "5"),
            ("LOG_FORMAT", "json"),
            ("LOG_LEVEL", "debug"),
        ])
        .unwrap();

        assert_eq!(config.server_addr.port(), 9000);
        assert_eq!(config.broker.address, "kafka:29092");
        assert_eq!(config.broker.topic, "iocs");
        assert_eq!(config.broker.batch_size, 25);
        assert_eq!(config.backend, StorageBackend::Memory);
        assert_eq!(config.postgres.host, "db.internal");
        assert_eq!(config.postgres.max_connections, 4);
        assert_eq!(config.pool.workers, 3);
        assert_eq!(config.pool.queue_capacity, 7);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(config.log.level, "debug");
    }

    #[test]
    fn test_unparseable_number_is_an_error() {
        let err = config_from(&[("BATCH_SIZE", "lots")]).unwrap_err();
        assert_eq!(err.name, "BATCH_SIZE");
        assert!(err.reason.contains("lots"));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = config_from(&[("WORKER_POOL_SIZE", "0")]).unwrap_err();
        assert_eq!(err.name, "WORKER_POOL_SIZE");
    }

    #[test]
    fn test_blank_values_fall_back_to_defaults() {
        let config = config_from(&[("DB_PORT", "  "), ("TOPIC", "")]).unwrap();
        assert_eq!(config.postgres.port, 5432);
        assert_eq!(config.broker.topic, "ioc.normalized.queue");
    }

    #[test]
    fn test_server_port_sets_listen_port() {
        let config = config_from(&[("SERVER_PORT", ":50051")]).unwrap();
        assert_eq!(config.server_addr.to_string(), "0.0.0.0:50051");

        let config = config_from(&[("SERVER_PORT", "9090")]).unwrap();
        assert_eq!(config.server_addr.port(), 9090);
    }

    #[test]
    fn test_server_addr_wins_over_server_port() {
        let config = config_from(&[
            ("SERVER_ADDR", "127.0.0.1:7000"),
            ("SERVER_PORT", ":9090"),
        ])
        .unwrap();
        assert_eq!(config.server_addr.to_string(), "127.0.0.1:7000");
    }

    #[test]
    fn test_bad_server_port_rejected() {
        let err = config_from(&[("SERVER_PORT", ":http")]).unwrap_err();
        assert_eq!(err.name, "SERVER_PORT");
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let err = config_from(&[("STORAGE_BACKEND", "sqlite")]).unwrap_err();
        assert_eq!(err.name, "STORAGE_BACKEND");
        assert!(err.reason.contains("sqlite"));
    }
}
