//! Configuration for the PostgreSQL storage backend.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use iocvault_core::ConnectRetryPolicy;

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_user() -> String {
    "user".to_string()
}

fn default_password() -> String {
    "password".to_string()
}

fn default_database() -> String {
    "app_db".to_string()
}

fn default_max_connections() -> u32 {
    20
}

fn default_connect_retries() -> u32 {
    5
}

fn default_retry_delay_secs() -> u64 {
    5
}

/// Connection settings for [`PostgresIocStore`](crate::PostgresIocStore).
#[derive(Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default = "default_password")]
    pub password: String,

    #[serde(default = "default_database")]
    pub database: String,

    /// Pool size shared by every worker task.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Retries after the first failed connection attempt.
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,

    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            user: default_user(),
            password: default_password(),
            database: default_database(),
            max_connections: default_max_connections(),
            connect_retries: default_connect_retries(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

impl PostgresConfig {
    pub fn retry_policy(&self) -> ConnectRetryPolicy {
        ConnectRetryPolicy::new(
            self.connect_retries,
            Duration::from_secs(self.retry_delay_secs),
        )
    }
}

// Hand-written so the password never reaches the logs.
impl std::fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("database", &self.database)
            .field("max_connections", &self.max_connections)
            .field("connect_retries", &self.connect_retries)
            .field("retry_delay_secs", &self.retry_delay_secs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PostgresConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 5432);
        assert_eq!(config.database, "app_db");
        assert_eq!(config.max_connections, 20);
        assert_eq!(config.retry_policy(), ConnectRetryPolicy::default());
    }

    #[test]
    fn test_deserialize_partial_uses_defaults() {
        let config: PostgresConfig =
            serde_json::from_str(r#"{"host": "db.internal", "port": 6432}"#).unwrap();
        assert_eq!(config.host, "db.internal");
        assert_eq!(config.port, 6432);
        assert_eq!(config.user, "user");
        assert_eq!(config.connect_retries, 5);
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = PostgresConfig {
            password: "hunter2".to_string(),
            ..Default::default()
        };
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("***"));
    }
}
