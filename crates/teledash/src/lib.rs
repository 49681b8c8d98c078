// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! teledash - live MQTT telemetry cache
//!
//! Maintains a continuously updated view of the latest message per topic
//! for a small fleet of embedded sensor nodes, derives typed readings
//! from it, and keeps a bounded rolling history for charting. Operator
//! commands (alarm mute, threshold updates) ride the same link back.
//!
//! # Features
//!
//! - **Latest-value Store** -- one mutex domain, snapshot reads, O(1) writes
//! - **Session Lifecycle** -- explicit start/stop; reconnect replaces the
//!   session + store pair, so stale callbacks can never leak forward
//! - **Lenient Derivation** -- locale-tolerant numeric parsing, JSON
//!   bundle fallback; malformed input reads as missing, never as zero
//! - **Rolling History** -- bounded FIFO with gap-preserving series
//! - **SQLite Read Path** -- optional, degrades to "history unavailable"
//!
//! # Architecture
//!
//! ```text
//! TelemetryService
//! +-- Session            (one broker link + receive task)
//! |   +-- StateStore     (latest record per topic, connected, last_error)
//! +-- BrokerConnector    (rumqttc adapter or mock)
//!
//! consumers: snapshot() -> values::* -> RollingHistory / SqliteHistory
//! ```
//!
//! # Example
//!
//! ```ignore
//! use teledash::{Config, RumqttConnector, TelemetryService};
//!
//! let config = Config::builder()
//!     .broker_host("192.168.1.40")
//!     .subscribe("#")
//!     .build();
//!
//! let service = TelemetryService::start(RumqttConnector::new(), config);
//! let snapshot = service.snapshot();
//! ```

pub mod broker;
pub mod config;
pub mod error;
pub mod history;
pub mod rumqtt;
pub mod session;
pub mod sqlite;
pub mod store;
pub mod values;

pub use broker::{BrokerConnector, BrokerHandle, CommandSink, LinkEvent, MockBroker};
pub use config::{Config, DatabaseConfig};
pub use error::{HistoryError, LinkError};
pub use history::{HistoryPoint, RollingHistory, MAX_POINTS};
pub use rumqtt::RumqttConnector;
pub use session::{Session, SessionStats, MUTE_PAYLOAD, TOPIC_MUTE_ALARM, TOPIC_THRESHOLD};
pub use sqlite::{SeriesReader, SeriesRow, SqliteHistory};
pub use store::{StateStore, StoreSnapshot, TopicRecord};

/// Telemetry Service
///
/// Owns the current session and the knowledge of how to build its
/// replacement. Reconnecting consumes the service and returns a new one
/// so an old session's store can never be mutated in place.
pub struct TelemetryService<B: BrokerConnector> {
    connector: B,
    config: Config,
    session: Session,
}

impl<B: BrokerConnector> TelemetryService<B> {
    /// Start the service: opens the first session immediately.
    pub fn start(connector: B, config: Config) -> Self {
        let session = Session::start(&connector, config.clone());
        Self {
            connector,
            config,
            session,
        }
    }

    /// Current session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Effective configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Snapshot of the current session's store.
    pub fn snapshot(&self) -> StoreSnapshot {
        self.session.snapshot()
    }

    /// Replace the session + store pair: stop the old session, then
    /// start a fresh one against the same broker settings.
    pub async fn reconnect(self) -> Self {
        tracing::info!("Reconnecting: replacing session and store");
        let Self {
            connector,
            config,
            session,
        } = self;

        session.stop().await;
        let session = Session::start(&connector, config.clone());
        Self {
            connector,
            config,
            session,
        }
    }

    /// Stop the current session and consume the service.
    pub async fn shutdown(self) {
        self.session.stop().await;
    }
}
