// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Broker session lifecycle.
//!
//! One [`Session`] owns one broker link, one [`StateStore`], and one
//! receive task. Reconnecting means stopping the old session and starting
//! a fresh one; sessions and stores are never reused, so a late event from
//! a stopped session can never leak into its successor's store.
//!
//! # Operation
//!
//! 1. `start` builds a store, opens the link, spawns the receive task
//! 2. The receive task waits for the broker handshake (bounded) and
//!    subscribes the configured filters
//! 3. Every inbound message is decoded (lossy UTF-8) and written to the
//!    store; link failures flip `connected` and record `last_error`
//! 4. `stop` requests link shutdown and waits for the task to finish

use crate::broker::{BrokerConnector, CommandSink, LinkEvent};
use crate::config::Config;
use crate::error::LinkError;
use crate::store::{StateStore, StoreSnapshot};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Default alarm mute command topic
pub const TOPIC_MUTE_ALARM: &str = "esp32/alarm/mute";

/// Default threshold command topic
pub const TOPIC_THRESHOLD: &str = "esp32_1/seuil";

/// Fixed payload of the alarm mute command
pub const MUTE_PAYLOAD: &[u8] = b"1";

#[derive(Debug, Default)]
struct Counters {
    messages_received: AtomicU64,
    publishes_sent: AtomicU64,
    publish_errors: AtomicU64,
    decode_replacements: AtomicU64,
}

/// Session statistics
#[derive(Debug, Default, Clone)]
pub struct SessionStats {
    /// Total messages written to the store
    pub messages_received: u64,
    /// Publishes successfully enqueued
    pub publishes_sent: u64,
    /// Publishes that failed at the enqueue step
    pub publish_errors: u64,
    /// Messages whose payload needed UTF-8 replacement characters
    pub decode_replacements: u64,
}

/// One broker connection with its owned store and receive task.
///
/// At most one live link exists per session object; `start` opens it and
/// nothing ever reopens it. All network failures are non-fatal and
/// surface through the store, never as panics or return values.
pub struct Session {
    store: Arc<StateStore>,
    sink: Arc<dyn CommandSink>,
    counters: Arc<Counters>,
    task: Option<JoinHandle<()>>,
}

impl Session {
    /// Start a session against `connector`.
    ///
    /// Returns immediately; handshake progress and failures surface
    /// through the session's store. Must be called inside a Tokio
    /// runtime (the receive task is spawned here).
    pub fn start(connector: &dyn BrokerConnector, config: Config) -> Self {
        let store = Arc::new(StateStore::new());
        let counters = Arc::new(Counters::default());
        let handle = connector.connect(&config);
        let sink = Arc::clone(&handle.sink);

        let task = tokio::spawn(run_link(
            config,
            Arc::clone(&store),
            Arc::clone(&sink),
            handle.events,
            Arc::clone(&counters),
        ));

        Self {
            store,
            sink,
            counters,
            task: Some(task),
        }
    }

    /// Shared handle to the session's store.
    pub fn store(&self) -> Arc<StateStore> {
        Arc::clone(&self.store)
    }

    /// Snapshot of the session's store.
    pub fn snapshot(&self) -> StoreSnapshot {
        self.store.snapshot()
    }

    /// Current broker link flag.
    pub fn connected(&self) -> bool {
        self.store.connected()
    }

    /// True while the receive task is still running.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    /// Fire-and-forget publish.
    ///
    /// Enqueue failures are recorded in the store rather than returned;
    /// callers observe them through `last_error` on the next refresh,
    /// the same channel disconnects use.
    pub fn publish(&self, topic: &str, payload: impl AsRef<[u8]>) {
        match self.sink.publish(topic, payload.as_ref()) {
            Ok(()) => {
                self.counters.publishes_sent.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Published {} bytes to '{}'", payload.as_ref().len(), topic);
            }
            Err(err) => {
                self.counters.publish_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Publish to '{}' failed: {}", topic, err);
                self.store.set_error(Some(err.to_string()));
            }
        }
    }

    /// Publish the fixed alarm mute command.
    pub fn mute_alarm(&self, topic: &str) {
        self.publish(topic, MUTE_PAYLOAD);
    }

    /// Publish a threshold update as numeric text.
    pub fn set_threshold(&self, topic: &str, value: i64) {
        self.publish(topic, value.to_string());
    }

    /// Session statistics snapshot.
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            messages_received: self.counters.messages_received.load(Ordering::Relaxed),
            publishes_sent: self.counters.publishes_sent.load(Ordering::Relaxed),
            publish_errors: self.counters.publish_errors.load(Ordering::Relaxed),
            decode_replacements: self.counters.decode_replacements.load(Ordering::Relaxed),
        }
    }

    /// Stop the session: request link shutdown and wait for the receive
    /// task to finish. Safe to call when the connection never came up.
    ///
    /// Once this returns, the session's store will not be written again.
    pub async fn stop(mut self) {
        self.sink.disconnect();
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
        self.store.set_connected(false);
        tracing::debug!("Session stopped");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

enum Handshake {
    Accepted,
    Refused(String),
}

/// Drain events until the broker accepts or the link dies.
async fn wait_connected(
    events: &mut mpsc::Receiver<LinkEvent>,
    store: &StateStore,
    counters: &Counters,
) -> Handshake {
    while let Some(event) = events.recv().await {
        match event {
            LinkEvent::Connected => return Handshake::Accepted,
            // A retained message can surface before we see the handshake
            // event; keep it rather than dropping telemetry.
            LinkEvent::Message { topic, payload } => {
                apply_message(store, counters, topic, payload);
            }
            LinkEvent::Disconnected => {
                return Handshake::Refused("link closed during handshake".to_string());
            }
            LinkEvent::Failed(reason) => return Handshake::Refused(reason),
        }
    }
    Handshake::Refused("link task ended during handshake".to_string())
}

async fn run_link(
    config: Config,
    store: Arc<StateStore>,
    sink: Arc<dyn CommandSink>,
    mut events: mpsc::Receiver<LinkEvent>,
    counters: Arc<Counters>,
) {
    let connect_timeout = Duration::from_secs(config.connect_timeout_secs);
    let handshake =
        tokio::time::timeout(connect_timeout, wait_connected(&mut events, &store, &counters))
            .await;

    match handshake {
        Ok(Handshake::Accepted) => {}
        Ok(Handshake::Refused(reason)) => {
            tracing::warn!(
                "Connect to {}:{} refused: {}",
                config.broker_host,
                config.broker_port,
                reason
            );
            store.set_connected(false);
            store.set_error(Some(LinkError::Connect(reason).to_string()));
            return;
        }
        Err(_) => {
            let reason = format!(
                "no broker handshake within {}s",
                config.connect_timeout_secs
            );
            tracing::warn!(
                "Connect to {}:{} timed out after {}s",
                config.broker_host,
                config.broker_port,
                config.connect_timeout_secs
            );
            store.set_connected(false);
            store.set_error(Some(LinkError::Connect(reason).to_string()));
            sink.disconnect();
            return;
        }
    }

    tracing::info!(
        "Connected to broker at {}:{}",
        config.broker_host,
        config.broker_port
    );
    store.set_connected(true);
    store.set_error(None);

    for filter in &config.subscriptions {
        match sink.subscribe(filter) {
            Ok(()) => tracing::debug!("Subscribed to '{}'", filter),
            Err(err) => {
                tracing::warn!("Subscribe to '{}' failed: {}", filter, err);
                store.set_error(Some(err.to_string()));
            }
        }
    }

    while let Some(event) = events.recv().await {
        match event {
            LinkEvent::Message { topic, payload } => {
                apply_message(&store, &counters, topic, payload);
            }
            // Duplicate handshake events carry no new information.
            LinkEvent::Connected => {}
            LinkEvent::Disconnected => {
                tracing::warn!("Broker closed the connection");
                store.set_connected(false);
                store.set_error(Some(
                    LinkError::Lost("connection closed by broker".to_string()).to_string(),
                ));
                return;
            }
            LinkEvent::Failed(reason) => {
                tracing::warn!("Broker link failed: {}", reason);
                store.set_connected(false);
                store.set_error(Some(LinkError::Lost(reason).to_string()));
                return;
            }
        }
    }

    // The adapter hung up without a terminal event.
    store.set_connected(false);
    store.set_error(Some(LinkError::Lost("link task ended".to_string()).to_string()));
}

/// Decode a payload (lossy UTF-8) and store it under its topic.
fn apply_message(store: &StateStore, counters: &Counters, topic: String, payload: Vec<u8>) {
    let text = match String::from_utf8(payload) {
        Ok(text) => text,
        Err(err) => {
            counters.decode_replacements.fetch_add(1, Ordering::Relaxed);
            String::from_utf8_lossy(err.as_bytes()).into_owned()
        }
    };
    counters.messages_received.fetch_add(1, Ordering::Relaxed);
    tracing::trace!("Message on '{}': {} chars", topic, text.len());
    store.put(topic, text);
}
