// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Broker link abstraction.
//!
//! Sessions never talk to an MQTT client directly: they consume
//! [`LinkEvent`]s from an adapter and issue commands through a
//! [`CommandSink`]. This keeps the session logic broker-agnostic and
//! testable without a live broker.
//!
//! # Integration
//!
//! Production uses [`RumqttConnector`](crate::rumqtt::RumqttConnector);
//! tests drive a session through [`MockBroker`]:
//!
//! ```ignore
//! let broker = MockBroker::new();
//! let session = Session::start(&broker, Config::default());
//! broker.last_link().unwrap().send(LinkEvent::Connected).await?;
//! ```

use crate::config::Config;
use crate::error::LinkError;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Inbound transport-level notification from a broker adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// The broker accepted the connection
    Connected,
    /// A message arrived on a subscribed topic (raw bytes, undecoded)
    Message { topic: String, payload: Vec<u8> },
    /// The broker closed the link
    Disconnected,
    /// The link failed; the adapter stops pumping after this event
    Failed(String),
}

/// Non-blocking command side of a broker link.
///
/// Every method enqueues and returns immediately; an `Err` means the
/// request could not even be enqueued (link task gone, queue full).
pub trait CommandSink: Send + Sync {
    /// Request a subscription to a topic filter
    fn subscribe(&self, filter: &str) -> Result<(), LinkError>;

    /// Enqueue a message for publication
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), LinkError>;

    /// Request link shutdown
    fn disconnect(&self);
}

/// Live link to a broker: command side plus event stream.
pub struct BrokerHandle {
    /// Command side, shared with publish callers
    pub sink: Arc<dyn CommandSink>,
    /// Transport events, pumped by the adapter until failure or hangup
    pub events: mpsc::Receiver<LinkEvent>,
}

/// Factory for broker links.
///
/// Connection establishment is asynchronous: `connect` only wires up the
/// link, and the outcome arrives as the first [`LinkEvent`]. Adapters
/// spawn their pump task here, so this must run inside a Tokio runtime.
pub trait BrokerConnector: Send + Sync {
    /// Open a link using the broker settings in `config`.
    fn connect(&self, config: &Config) -> BrokerHandle;
}

/// A shared reference connects too, so callers can hand a service a
/// borrowed connector and keep inspecting it (mock brokers in tests).
impl<B: BrokerConnector> BrokerConnector for &B {
    fn connect(&self, config: &Config) -> BrokerHandle {
        (**self).connect(config)
    }
}

// ============================================================================
// Mock Implementation for Testing
// ============================================================================

/// Mock broker for testing sessions without a live MQTT broker.
///
/// Each `connect` call hands out a fresh event channel; tests inject
/// [`LinkEvent`]s through [`MockBroker::last_link`] and assert on the
/// recorded subscribe/publish calls.
pub struct MockBroker {
    senders: std::sync::Mutex<Vec<mpsc::Sender<LinkEvent>>>,
    subscriptions: Arc<std::sync::Mutex<Vec<String>>>,
    published: Arc<std::sync::Mutex<Vec<(String, Vec<u8>)>>>,
    fail_subscribe: Arc<AtomicBool>,
    fail_publish: Arc<AtomicBool>,
    disconnects: Arc<AtomicUsize>,
}

impl MockBroker {
    /// Create a new mock broker
    pub fn new() -> Self {
        Self {
            senders: std::sync::Mutex::new(Vec::new()),
            subscriptions: Arc::new(std::sync::Mutex::new(Vec::new())),
            published: Arc::new(std::sync::Mutex::new(Vec::new())),
            fail_subscribe: Arc::new(AtomicBool::new(false)),
            fail_publish: Arc::new(AtomicBool::new(false)),
            disconnects: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Event injection handle for the most recent connection
    pub fn last_link(&self) -> Option<mpsc::Sender<LinkEvent>> {
        let senders = match self.senders.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        senders.last().cloned()
    }

    /// Event injection handle for the `index`-th connection (0-based)
    pub fn link(&self, index: usize) -> Option<mpsc::Sender<LinkEvent>> {
        let senders = match self.senders.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        senders.get(index).cloned()
    }

    /// Number of `connect` calls observed
    pub fn connection_count(&self) -> usize {
        let senders = match self.senders.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        senders.len()
    }

    /// Topic filters subscribed so far, in call order
    pub fn subscriptions(&self) -> Vec<String> {
        let subscriptions = match self.subscriptions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        subscriptions.clone()
    }

    /// Messages published so far, in call order
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        let published = match self.published.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        published.clone()
    }

    /// Number of disconnect requests observed
    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Make subsequent subscribe calls fail at the enqueue step
    pub fn set_fail_subscribe(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent publish calls fail at the enqueue step
    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerConnector for MockBroker {
    fn connect(&self, _config: &Config) -> BrokerHandle {
        let (tx, rx) = mpsc::channel(64);

        let mut senders = match self.senders.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        senders.push(tx);
        drop(senders);

        let sink = MockSink {
            subscriptions: Arc::clone(&self.subscriptions),
            published: Arc::clone(&self.published),
            fail_subscribe: Arc::clone(&self.fail_subscribe),
            fail_publish: Arc::clone(&self.fail_publish),
            disconnects: Arc::clone(&self.disconnects),
        };

        BrokerHandle {
            sink: Arc::new(sink),
            events: rx,
        }
    }
}

/// Mock command sink recording calls into the owning broker
struct MockSink {
    subscriptions: Arc<std::sync::Mutex<Vec<String>>>,
    published: Arc<std::sync::Mutex<Vec<(String, Vec<u8>)>>>,
    fail_subscribe: Arc<AtomicBool>,
    fail_publish: Arc<AtomicBool>,
    disconnects: Arc<AtomicUsize>,
}

impl CommandSink for MockSink {
    fn subscribe(&self, filter: &str) -> Result<(), LinkError> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(LinkError::Subscribe("mock subscribe rejected".to_string()));
        }
        let mut subscriptions = match self.subscriptions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        subscriptions.push(filter.to_string());
        Ok(())
    }

    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), LinkError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(LinkError::Publish("mock publish rejected".to_string()));
        }
        let mut published = match self.published.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        published.push((topic.to_string(), payload.to_vec()));
        Ok(())
    }

    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_records_commands() {
        let broker = MockBroker::new();
        let handle = broker.connect(&Config::default());

        handle.sink.subscribe("#").expect("subscribe should record");
        handle
            .sink
            .publish("esp32/alarm/mute", b"1")
            .expect("publish should record");
        handle.sink.disconnect();

        assert_eq!(broker.connection_count(), 1);
        assert_eq!(broker.subscriptions(), vec!["#"]);
        assert_eq!(
            broker.published(),
            vec![("esp32/alarm/mute".to_string(), b"1".to_vec())]
        );
        assert_eq!(broker.disconnect_count(), 1);
    }

    #[test]
    fn test_mock_injected_failures() {
        let broker = MockBroker::new();
        let handle = broker.connect(&Config::default());

        broker.set_fail_publish(true);
        let err = handle
            .sink
            .publish("esp32_1/seuil", b"42")
            .expect_err("publish should fail");
        assert!(err.to_string().contains("Publish failed"));

        broker.set_fail_subscribe(true);
        assert!(handle.sink.subscribe("#").is_err());
        assert!(broker.published().is_empty());
        assert!(broker.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn test_mock_links_are_per_connection() {
        let broker = MockBroker::new();
        let mut first = broker.connect(&Config::default());
        let mut second = broker.connect(&Config::default());

        broker
            .link(0)
            .expect("first link")
            .send(LinkEvent::Connected)
            .await
            .expect("send to first");
        broker
            .last_link()
            .expect("second link")
            .send(LinkEvent::Disconnected)
            .await
            .expect("send to second");

        assert_eq!(first.events.recv().await, Some(LinkEvent::Connected));
        assert_eq!(second.events.recv().await, Some(LinkEvent::Disconnected));
        assert_eq!(broker.connection_count(), 2);
    }
}
