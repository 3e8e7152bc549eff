//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Root configuration structure.
///
/// Holds a set of named MySQL connections (the read and write side of a run
/// are selected by name), the frontier store settings, and copy tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Named MySQL connection parameter sets.
    pub connections: HashMap<String, ConnectionConfig>,

    /// Frontier (Redis) store configuration.
    #[serde(default)]
    pub frontier: FrontierConfig,

    /// Copy behavior configuration.
    #[serde(default)]
    pub copy: CopyConfig,
}

/// A single MySQL connection parameter set.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 3306).
    #[serde(default = "default_mysql_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,
}

// Manual Debug: the password must never reach log output.
impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl ConnectionConfig {
    /// Build a connection URL for sqlx.
    pub fn url(&self) -> String {
        format!(
            "mysql://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.database
        )
    }

    /// Build connection options for mysql_async.
    pub fn opts(&self) -> mysql_async::Opts {
        mysql_async::OptsBuilder::default()
            .ip_or_hostname(&self.host)
            .tcp_port(self.port)
            .db_name(Some(&self.database))
            .user(Some(&self.user))
            .pass(Some(&self.password))
            // Full Unicode support on the write side
            .init(vec!["SET NAMES utf8mb4"])
            .into()
    }
}

/// Frontier (Redis) store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrontierConfig {
    /// Redis host.
    #[serde(default = "default_redis_host")]
    pub host: String,

    /// Redis port (default: 6379).
    #[serde(default = "default_redis_port")]
    pub port: u16,

    /// Redis logical database index.
    #[serde(default)]
    pub db: u8,
}

impl Default for FrontierConfig {
    fn default() -> Self {
        Self {
            host: default_redis_host(),
            port: default_redis_port(),
            db: 0,
        }
    }
}

impl FrontierConfig {
    /// Build a connection URL for the redis client.
    pub fn url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }
}

/// Copy behavior configuration.
/// All fields use Option<T> to distinguish "not set" (use the built-in
/// default) from "explicitly set".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CopyConfig {
    /// Number of parallel seed-copy workers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<usize>,

    /// Rows per extraction page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_chunk_size: Option<usize>,

    /// Keys per direct-fetch query in the closure phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_chunk_size: Option<usize>,

    /// Rows per INSERT statement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insert_batch_size: Option<usize>,
}

impl CopyConfig {
    // Accessor methods that return the effective value with fallback defaults.

    pub fn get_max_workers(&self) -> usize {
        self.max_workers.unwrap_or(4)
    }

    pub fn get_fetch_chunk_size(&self) -> usize {
        self.fetch_chunk_size.unwrap_or(20_000)
    }

    pub fn get_reference_chunk_size(&self) -> usize {
        self.reference_chunk_size.unwrap_or(5_000)
    }

    pub fn get_insert_batch_size(&self) -> usize {
        self.insert_batch_size.unwrap_or(500)
    }
}

// Default value functions for serde

fn default_mysql_port() -> u16 {
    3306
}

fn default_redis_host() -> String {
    "localhost".to_string()
}

fn default_redis_port() -> u16 {
    6379
}
