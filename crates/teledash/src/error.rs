// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types.
//!
//! Link failures are non-fatal by contract: sessions render them into
//! [`StateStore::set_error`](crate::store::StateStore::set_error) and keep
//! serving the last known view. Payload decode failures never produce an
//! error (undecodable bytes are replaced), and numeric parse failures
//! yield `None` rather than an error value.

use thiserror::Error;

/// Broker link errors, surfaced through the store as display strings.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Connection lost: {0}")]
    Lost(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Publish failed: {0}")]
    Publish(String),
}

/// Relational history read path errors.
///
/// Callers treat any of these as "history unavailable"; they never take
/// the live view down.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("Failed to open history database at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("History query failed: {0}")]
    Query(#[from] rusqlite::Error),
}
