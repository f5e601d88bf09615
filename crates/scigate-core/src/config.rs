// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::time::Duration;

/// Scigate core configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Identity of this orchestrator/handler process; scopes all
    /// coordination-tree paths.
    pub server_name: String,
    /// SQLite connection URL or file path for the record store.
    pub database_url: String,
    /// Address of the coordination-tree service.
    pub coordination_addr: String,
    /// Session timeout for coordination-tree operations.
    pub coordination_timeout: Duration,
    /// Whether the connection pool reclaims abandoned clients.
    pub pool_abandoned_removal_enabled: bool,
    /// Whether reclaimed abandoned clients are logged.
    pub pool_abandoned_removal_logged: bool,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `SCIGATE_SERVER_NAME`: identity scoping coordination paths
    /// - `SCIGATE_DATABASE_URL`: SQLite connection string
    ///
    /// Optional (with defaults):
    /// - `SCIGATE_COORDINATION_ADDR`: coordination-tree address (default: localhost:2181)
    /// - `SCIGATE_COORDINATION_TIMEOUT_MS`: session timeout (default: 3000)
    /// - `SCIGATE_POOL_ABANDONED_REMOVAL_ENABLED`: reclaim abandoned pool clients (default: false)
    /// - `SCIGATE_POOL_ABANDONED_REMOVAL_LOGGED`: log reclaimed clients (default: false)
    pub fn from_env() -> Result<Self, ConfigError> {
        let server_name = std::env::var("SCIGATE_SERVER_NAME")
            .map_err(|_| ConfigError::Missing("SCIGATE_SERVER_NAME"))?;

        let database_url = std::env::var("SCIGATE_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("SCIGATE_DATABASE_URL"))?;

        let coordination_addr = std::env::var("SCIGATE_COORDINATION_ADDR")
            .unwrap_or_else(|_| "localhost:2181".to_string());

        let coordination_timeout_ms: u64 = std::env::var("SCIGATE_COORDINATION_TIMEOUT_MS")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid(
                    "SCIGATE_COORDINATION_TIMEOUT_MS",
                    "must be a duration in milliseconds",
                )
            })?;

        let pool_abandoned_removal_enabled =
            parse_bool("SCIGATE_POOL_ABANDONED_REMOVAL_ENABLED", false)?;
        let pool_abandoned_removal_logged =
            parse_bool("SCIGATE_POOL_ABANDONED_REMOVAL_LOGGED", false)?;

        Ok(Self {
            server_name,
            database_url,
            coordination_addr,
            coordination_timeout: Duration::from_millis(coordination_timeout_ms),
            pool_abandoned_removal_enabled,
            pool_abandoned_removal_logged,
        })
    }
}

fn parse_bool(var: &'static str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(var) {
        Ok(value) => match value.as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(ConfigError::Invalid(var, "must be 'true' or 'false'")),
        },
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
