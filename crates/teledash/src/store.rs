// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Latest-value store shared between a session's receive loop and its
//! snapshot consumers.
//!
//! # Architecture
//!
//! ```text
//! receive loop ── put() / set_connected() / set_error() ──┐
//!                                                         v
//!                                              Mutex<StoreInner>
//!                                                         ^
//! consumers ─────────────── snapshot() ───────────────────┘
//! ```
//!
//! All fields live under one mutex. Writers replace whole values; readers
//! copy whole values. The lock is never held across decoding, parsing, or
//! I/O, so every critical section is a handful of assignments.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Latest message seen on one topic.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicRecord {
    /// Payload text (lossy UTF-8 decode of the raw bytes)
    pub payload: String,
    /// Receipt timestamp stamped on `put`
    pub received_at: DateTime<Utc>,
}

/// Point-in-time copy of the store, detached from further mutation.
#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    /// Latest record per topic
    pub records: HashMap<String, TopicRecord>,
    /// Broker link state at snapshot time
    pub connected: bool,
    /// Most recent link error, if any
    pub last_error: Option<String>,
}

impl StoreSnapshot {
    /// Latest record for `topic`, if any message arrived on it.
    pub fn record(&self, topic: &str) -> Option<&TopicRecord> {
        self.records.get(topic)
    }

    /// Latest payload text for `topic`.
    pub fn payload(&self, topic: &str) -> Option<&str> {
        self.records.get(topic).map(|r| r.payload.as_str())
    }

    /// Number of distinct topics seen.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when no message has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    records: HashMap<String, TopicRecord>,
    connected: bool,
    last_error: Option<String>,
}

/// Thread-safe latest-value view of the telemetry stream.
///
/// One store exists per broker session and is never reused across
/// sessions; a reconnect builds a fresh session + store pair.
#[derive(Debug, Default)]
pub struct StateStore {
    inner: Mutex<StoreInner>,
}

impl StateStore {
    /// Create an empty store (disconnected, no error, no records).
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the record for `topic` as a single unit, stamping the
    /// receipt time. Last write wins.
    pub fn put(&self, topic: impl Into<String>, payload: impl Into<String>) {
        let record = TopicRecord {
            payload: payload.into(),
            received_at: Utc::now(),
        };
        self.inner.lock().records.insert(topic.into(), record);
    }

    /// Update the broker link flag.
    pub fn set_connected(&self, connected: bool) {
        self.inner.lock().connected = connected;
    }

    /// Record (or clear) the most recent link error.
    pub fn set_error(&self, error: Option<String>) {
        self.inner.lock().last_error = error;
    }

    /// Current broker link flag.
    pub fn connected(&self) -> bool {
        self.inner.lock().connected
    }

    /// Most recent link error, if any.
    pub fn last_error(&self) -> Option<String> {
        self.inner.lock().last_error.clone()
    }

    /// Copy all fields atomically. The snapshot is independent: later
    /// store mutation never alters a snapshot already taken.
    pub fn snapshot(&self) -> StoreSnapshot {
        let inner = self.inner.lock();
        StoreSnapshot {
            records: inner.records.clone(),
            connected: inner.connected,
            last_error: inner.last_error.clone(),
        }
    }
}
