// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Session lifecycle integration tests.
//!
//! Drives real sessions against the mock broker to pin the lifecycle
//! contract: explicit stop, fresh store per session, and no leakage from
//! a stopped session into its successor.

use std::sync::Arc;
use std::time::Duration;
use teledash::{Config, LinkEvent, MockBroker, Session};

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within 1s");
}

#[tokio::test]
async fn test_no_cross_session_leakage() {
    let broker = MockBroker::new();

    // Session A receives one reading, then stops.
    let session_a = Session::start(&broker, Config::default());
    let link_a = broker.last_link().expect("link A");
    link_a.send(LinkEvent::Connected).await.expect("connack A");
    link_a
        .send(LinkEvent::Message {
            topic: "esp32_1/temp".to_string(),
            payload: b"21.5".to_vec(),
        })
        .await
        .expect("message to A");

    let store_a = session_a.store();
    wait_for(|| store_a.snapshot().len() == 1).await;
    session_a.stop().await;

    // Session B comes up with its own store.
    let session_b = Session::start(&broker, Config::default());
    let link_b = broker.last_link().expect("link B");
    link_b.send(LinkEvent::Connected).await.expect("connack B");
    wait_for(|| session_b.connected()).await;

    // A late message aimed at the stopped session goes nowhere.
    let late = link_a
        .send(LinkEvent::Message {
            topic: "esp32_1/temp".to_string(),
            payload: b"99.9".to_vec(),
        })
        .await;
    assert!(late.is_err(), "stopped session should have hung up its link");

    link_b
        .send(LinkEvent::Message {
            topic: "esp32_1/ldr".to_string(),
            payload: b"512".to_vec(),
        })
        .await
        .expect("message to B");
    wait_for(|| session_b.snapshot().len() == 1).await;

    let snap_b = session_b.snapshot();
    assert_eq!(snap_b.payload("esp32_1/ldr"), Some("512"));
    assert_eq!(
        snap_b.payload("esp32_1/temp"),
        None,
        "session B must never see session A's data"
    );

    // A's store still holds only what arrived before stop.
    let snap_a = store_a.snapshot();
    assert_eq!(snap_a.payload("esp32_1/temp"), Some("21.5"));
    session_b.stop().await;
}

#[tokio::test]
async fn test_each_session_owns_a_fresh_store() {
    let broker = MockBroker::new();

    let session_a = Session::start(&broker, Config::default());
    let store_a = session_a.store();
    session_a.stop().await;

    let session_b = Session::start(&broker, Config::default());
    let store_b = session_b.store();

    assert!(
        !Arc::ptr_eq(&store_a, &store_b),
        "stores must not be reused across sessions"
    );
    assert!(store_b.snapshot().is_empty());
    assert_eq!(broker.connection_count(), 2);
    session_b.stop().await;
}

#[tokio::test]
async fn test_stop_before_handshake_completes() {
    let broker = MockBroker::new();
    let session = Session::start(
        &broker,
        Config::builder().connect_timeout_secs(3600).build(),
    );

    // No handshake event ever arrives; stop must still return promptly.
    let stopped = tokio::time::timeout(Duration::from_secs(2), session.stop()).await;
    assert!(stopped.is_ok(), "stop() hung on an unconnected session");
    assert_eq!(broker.disconnect_count(), 1);
}

#[tokio::test]
async fn test_sessions_share_one_broker_connection_each() {
    let broker = MockBroker::new();
    let session = Session::start(&broker, Config::default());
    let link = broker.last_link().expect("link");

    link.send(LinkEvent::Connected).await.expect("connack");
    wait_for(|| session.connected()).await;

    // Publishing and snapshotting reuse the session's single link.
    session.publish("esp32_1/seuil", "25");
    session.publish("esp32/alarm/mute", "1");
    assert_eq!(broker.connection_count(), 1);
    assert_eq!(broker.published().len(), 2);
    session.stop().await;
}
