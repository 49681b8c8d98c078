// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! rumqttc-backed broker link implementation.
//!
//! Telemetry and commands both ride QoS 0: the fleet republishes on its
//! own cadence, so nothing here needs broker-side redelivery. The pump
//! task stops on the first connection error instead of letting rumqttc
//! retry; reconnecting is a session-level decision.

use crate::broker::{BrokerConnector, BrokerHandle, CommandSink, LinkEvent};
use crate::config::Config;
use crate::error::LinkError;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Outstanding client requests (subscribe/publish) before try_* calls fail.
const REQUEST_QUEUE_CAPACITY: usize = 64;

/// Inbound link events buffered between the pump and the session.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// MQTT 3.1.1 connector over rumqttc.
#[derive(Debug, Default)]
pub struct RumqttConnector;

impl RumqttConnector {
    /// Create a new connector
    pub fn new() -> Self {
        Self
    }
}

impl BrokerConnector for RumqttConnector {
    fn connect(&self, config: &Config) -> BrokerHandle {
        let mut options = MqttOptions::new(
            config.client_id.clone(),
            config.broker_host.clone(),
            config.broker_port,
        );
        // rumqttc rejects keepalives below 5 seconds.
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
        options.set_clean_session(true);

        let (client, eventloop) = AsyncClient::new(options, REQUEST_QUEUE_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        tracing::debug!(
            "Opening MQTT link to {}:{} as '{}'",
            config.broker_host,
            config.broker_port,
            config.client_id
        );
        tokio::spawn(pump(eventloop, events_tx));

        BrokerHandle {
            sink: Arc::new(RumqttSink { client }),
            events: events_rx,
        }
    }
}

/// Forward rumqttc packets as link events until the link dies or the
/// session hangs up.
async fn pump(mut eventloop: EventLoop, events: mpsc::Sender<LinkEvent>) {
    loop {
        tokio::select! {
            _ = events.closed() => {
                tracing::debug!("Session hung up, stopping MQTT pump");
                return;
            }
            polled = eventloop.poll() => match polled {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        if events.send(LinkEvent::Connected).await.is_err() {
                            return;
                        }
                    } else {
                        let reason = format!("broker refused connection: {:?}", ack.code);
                        let _ = events.send(LinkEvent::Failed(reason)).await;
                        return;
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let event = LinkEvent::Message {
                        topic: publish.topic,
                        payload: publish.payload.to_vec(),
                    };
                    if events.send(event).await.is_err() {
                        return;
                    }
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    let _ = events.send(LinkEvent::Disconnected).await;
                    return;
                }
                // Pings, acks and outgoing echoes carry nothing for the store.
                Ok(_) => {}
                Err(err) => {
                    let _ = events.send(LinkEvent::Failed(err.to_string())).await;
                    return;
                }
            }
        }
    }
}

struct RumqttSink {
    client: AsyncClient,
}

impl CommandSink for RumqttSink {
    fn subscribe(&self, filter: &str) -> Result<(), LinkError> {
        self.client
            .try_subscribe(filter, QoS::AtMostOnce)
            .map_err(|e| LinkError::Subscribe(e.to_string()))
    }

    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), LinkError> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(|e| LinkError::Publish(e.to_string()))
    }

    fn disconnect(&self) {
        let _ = self.client.try_disconnect();
    }
}
