// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Telemetry session configuration

use serde::{Deserialize, Serialize};

use crate::history::MAX_POINTS;

/// Telemetry session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Broker hostname or IP address
    pub broker_host: String,

    /// Broker TCP port
    pub broker_port: u16,

    /// MQTT client identifier
    pub client_id: String,

    /// Keepalive interval in seconds
    pub keep_alive_secs: u64,

    /// Bound on the initial connect handshake in seconds
    pub connect_timeout_secs: u64,

    /// Topic filters to subscribe on connect ("#" = everything)
    pub subscriptions: Vec<String>,

    /// Rolling history capacity in points
    pub history_capacity: usize,

    /// Snapshot refresh period in seconds (client polling hint)
    pub refresh_secs: u64,

    /// Relational history store (None = history read path disabled)
    pub database: Option<DatabaseConfig>,
}

/// Relational history store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file path
    pub path: String,

    /// Default row limit for history queries
    pub query_limit: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "teledash.db".to_string(),
            query_limit: 50,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker_host: "localhost".to_string(),
            broker_port: 1883,
            client_id: "teledash".to_string(),
            keep_alive_secs: 60,
            connect_timeout_secs: 10,
            subscriptions: vec!["#".to_string()],
            history_capacity: MAX_POINTS,
            refresh_secs: 2,
            database: None,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Defaults overridden by the `MQTT_HOST` / `MQTT_PORT` environment
    /// variables when present. An unparsable port is ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Config::default();

        if let Ok(host) = std::env::var("MQTT_HOST") {
            if !host.is_empty() {
                config.broker_host = host;
            }
        }

        if let Ok(port) = std::env::var("MQTT_PORT") {
            match port.parse::<u16>() {
                Ok(p) => config.broker_port = p,
                Err(_) => {
                    tracing::warn!("Ignoring unparsable MQTT_PORT value: {}", port);
                }
            }
        }

        config
    }
}

/// Config builder for fluent API
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    broker_host: Option<String>,
    broker_port: Option<u16>,
    client_id: Option<String>,
    keep_alive_secs: Option<u64>,
    connect_timeout_secs: Option<u64>,
    subscriptions: Option<Vec<String>>,
    history_capacity: Option<usize>,
    refresh_secs: Option<u64>,
    database: Option<DatabaseConfig>,
}

impl ConfigBuilder {
    /// Set broker hostname or IP address
    pub fn broker_host(mut self, host: impl Into<String>) -> Self {
        self.broker_host = Some(host.into());
        self
    }

    /// Set broker TCP port
    pub fn broker_port(mut self, port: u16) -> Self {
        self.broker_port = Some(port);
        self
    }

    /// Set MQTT client identifier
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    /// Set keepalive interval in seconds
    pub fn keep_alive_secs(mut self, secs: u64) -> Self {
        self.keep_alive_secs = Some(secs);
        self
    }

    /// Set connect handshake timeout in seconds
    pub fn connect_timeout_secs(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = Some(secs);
        self
    }

    /// Replace the subscription filter list
    pub fn subscriptions(mut self, filters: Vec<String>) -> Self {
        self.subscriptions = Some(filters);
        self
    }

    /// Add a single subscription filter
    pub fn subscribe(mut self, filter: impl Into<String>) -> Self {
        self.subscriptions
            .get_or_insert_with(Vec::new)
            .push(filter.into());
        self
    }

    /// Set rolling history capacity in points
    pub fn history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = Some(capacity);
        self
    }

    /// Set snapshot refresh period in seconds
    pub fn refresh_secs(mut self, secs: u64) -> Self {
        self.refresh_secs = Some(secs);
        self
    }

    /// Enable the relational history read path
    pub fn database(mut self, database: DatabaseConfig) -> Self {
        self.database = Some(database);
        self
    }

    /// Build the configuration
    pub fn build(self) -> Config {
        let defaults = Config::default();

        Config {
            broker_host: self.broker_host.unwrap_or(defaults.broker_host),
            broker_port: self.broker_port.unwrap_or(defaults.broker_port),
            client_id: self.client_id.unwrap_or(defaults.client_id),
            keep_alive_secs: self.keep_alive_secs.unwrap_or(defaults.keep_alive_secs),
            connect_timeout_secs: self
                .connect_timeout_secs
                .unwrap_or(defaults.connect_timeout_secs),
            subscriptions: self.subscriptions.unwrap_or(defaults.subscriptions),
            history_capacity: self.history_capacity.unwrap_or(defaults.history_capacity),
            refresh_secs: self.refresh_secs.unwrap_or(defaults.refresh_secs),
            database: self.database.or(defaults.database),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = Config::builder()
            .broker_host("10.0.0.7")
            .broker_port(8883)
            .client_id("bench-client")
            .keep_alive_secs(30)
            .subscribe("esp32_1/temp")
            .subscribe("esp32/sensors/luminosity")
            .history_capacity(500)
            .build();

        assert_eq!(config.broker_host, "10.0.0.7");
        assert_eq!(config.broker_port, 8883);
        assert_eq!(config.client_id, "bench-client");
        assert_eq!(config.keep_alive_secs, 30);
        assert_eq!(
            config.subscriptions,
            vec!["esp32_1/temp", "esp32/sensors/luminosity"]
        );
        assert_eq!(config.history_capacity, 500);
        assert!(config.database.is_none());
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::default();

        assert_eq!(config.broker_host, "localhost");
        assert_eq!(config.broker_port, 1883);
        assert_eq!(config.keep_alive_secs, 60);
        assert_eq!(config.connect_timeout_secs, 10);
        assert_eq!(config.subscriptions, vec!["#"]);
        assert_eq!(config.history_capacity, MAX_POINTS);
        assert!(config.database.is_none());
    }

    #[test]
    fn test_subscriptions_replace_then_add() {
        let config = Config::builder()
            .subscriptions(vec!["esp32_1/#".to_string()])
            .subscribe("capteur")
            .build();

        assert_eq!(config.subscriptions, vec!["esp32_1/#", "capteur"]);
    }

    #[test]
    fn test_database_config_defaults() {
        let db = DatabaseConfig::default();

        assert_eq!(db.path, "teledash.db");
        assert_eq!(db.query_limit, 50);
    }
}
