// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SQLite history read path.
//!
//! Minimal relational access for charting further back than the rolling
//! history reaches. The live view never depends on it: any failure here
//! degrades to "history unavailable" in the caller.

use crate::error::HistoryError;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use std::sync::Mutex;

/// One persisted history row.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesRow {
    /// Insertion id (monotonic per database)
    pub id: i64,
    /// Recording timestamp
    pub recorded_at: DateTime<Utc>,
    /// Numeric value
    pub value: f64,
}

/// Narrow read interface over the relational history store.
pub trait SeriesReader: Send + Sync {
    /// Most recent `limit` rows of `series`, ordered by insertion id
    /// ascending. An empty vec means nothing was recorded.
    fn recent(&self, series: &str, limit: usize) -> Result<Vec<SeriesRow>, HistoryError>;
}

/// SQLite-backed history store.
///
/// Thread-safe via internal Mutex (SQLite Connection is not Sync).
///
/// # Schema
///
/// ```sql
/// CREATE TABLE history (
///     id INTEGER PRIMARY KEY AUTOINCREMENT,
///     series TEXT NOT NULL,
///     recorded_at TEXT NOT NULL,
///     value REAL NOT NULL
/// );
/// CREATE INDEX idx_series ON history(series);
/// ```
pub struct SqliteHistory {
    conn: Mutex<Connection>,
}

impl SqliteHistory {
    /// Open (creating if needed) a file-based history database.
    pub fn open(path: &str) -> Result<Self, HistoryError> {
        let conn = Connection::open(path).map_err(|source| HistoryError::Open {
            path: path.to_string(),
            source,
        })?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Open an existing history database read-only.
    ///
    /// Unlike [`open`](Self::open) this never creates the file: a missing
    /// database is an error, which the read path renders as unavailable.
    pub fn open_read_only(path: &str) -> Result<Self, HistoryError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|source| HistoryError::Open {
            path: path.to_string(),
            source,
        })?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory history database (for testing).
    pub fn open_in_memory() -> Result<Self, HistoryError> {
        let conn = Connection::open_in_memory().map_err(|source| HistoryError::Open {
            path: ":memory:".to_string(),
            source,
        })?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), HistoryError> {
        let conn = self.lock_conn();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                series TEXT NOT NULL,
                recorded_at TEXT NOT NULL,
                value REAL NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_series ON history(series)",
            [],
        )?;

        Ok(())
    }

    fn lock_conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Append one row. This is the whole write path: recording stays a
    /// thin hook beside the read-oriented schema.
    pub fn append(
        &self,
        series: &str,
        recorded_at: DateTime<Utc>,
        value: f64,
    ) -> Result<(), HistoryError> {
        let conn = self.lock_conn();
        conn.execute(
            "INSERT INTO history (series, recorded_at, value) VALUES (?1, ?2, ?3)",
            params![series, recorded_at.to_rfc3339(), value],
        )?;

        Ok(())
    }

    /// Distinct series names present in the database.
    pub fn series_names(&self) -> Result<Vec<String>, HistoryError> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare("SELECT DISTINCT series FROM history ORDER BY series")?;

        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;

        Ok(names)
    }

    /// Helper function to map a row to a SeriesRow
    fn row_to_series_row(row: &rusqlite::Row) -> rusqlite::Result<SeriesRow> {
        let recorded_at: String = row.get(1)?;
        let recorded_at = DateTime::parse_from_rfc3339(&recorded_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    1,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?;

        Ok(SeriesRow {
            id: row.get(0)?,
            recorded_at,
            value: row.get(2)?,
        })
    }
}

impl SeriesReader for SqliteHistory {
    fn recent(&self, series: &str, limit: usize) -> Result<Vec<SeriesRow>, HistoryError> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT id, recorded_at, value
             FROM history
             WHERE series = ?1
             ORDER BY id DESC
             LIMIT ?2",
        )?;

        let mut rows = stmt
            .query_map(
                params![series, limit as i64],
                Self::row_to_series_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        // Query newest-first for the LIMIT, return oldest-first for charting.
        rows.reverse();
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_recent_orders_by_insertion() {
        let store = SqliteHistory::open_in_memory().expect("Failed to create in-memory store");

        for value in [20.0, 20.5, 21.0, 21.5, 22.0] {
            store
                .append("temperature", Utc::now(), value)
                .expect("Failed to append row");
        }

        let rows = store.recent("temperature", 3).expect("Failed to query");
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].value, 21.0);
        assert_eq!(rows[2].value, 22.0);
        assert!(rows[0].id < rows[1].id && rows[1].id < rows[2].id);
    }

    #[test]
    fn test_recent_unknown_series_is_empty() {
        let store = SqliteHistory::open_in_memory().expect("Failed to create in-memory store");
        store
            .append("temperature", Utc::now(), 21.0)
            .expect("Failed to append row");

        let rows = store.recent("luminosity", 10).expect("Failed to query");
        assert!(rows.is_empty());

        let rows = store.recent("temperature", 0).expect("Failed to query");
        assert!(rows.is_empty());
    }

    #[test]
    fn test_series_names_are_distinct_and_sorted() {
        let store = SqliteHistory::open_in_memory().expect("Failed to create in-memory store");
        store
            .append("temperature", Utc::now(), 21.0)
            .expect("Failed to append row");
        store
            .append("luminosity", Utc::now(), 512.0)
            .expect("Failed to append row");
        store
            .append("temperature", Utc::now(), 21.5)
            .expect("Failed to append row");

        let names = store.series_names().expect("Failed to list series");
        assert_eq!(names, vec!["luminosity", "temperature"]);
    }

    #[test]
    fn test_file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("history.db");
        let path = path.to_str().expect("Temp path not UTF-8");

        {
            let store = SqliteHistory::open(path).expect("Failed to open store");
            store
                .append("temperature", Utc::now(), 21.0)
                .expect("Failed to append row");
        }

        let store = SqliteHistory::open(path).expect("Failed to reopen store");
        let rows = store.recent("temperature", 10).expect("Failed to query");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, 21.0);
    }

    #[test]
    fn test_unopenable_path_reports_unavailable() {
        let err = SqliteHistory::open("/nonexistent/dir/history.db")
            .err()
            .expect("open should fail");
        assert!(err.to_string().contains("Failed to open history database"));
    }

    #[test]
    fn test_read_only_open_requires_existing_file() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("history.db");
        let path = path.to_str().expect("Temp path not UTF-8");

        assert!(SqliteHistory::open_read_only(path).is_err());

        SqliteHistory::open(path)
            .expect("Failed to open store")
            .append("temperature", Utc::now(), 21.0)
            .expect("Failed to append row");

        let reader = SqliteHistory::open_read_only(path).expect("Failed to reopen read-only");
        let rows = reader.recent("temperature", 10).expect("Failed to query");
        assert_eq!(rows.len(), 1);
        assert!(reader.append("temperature", Utc::now(), 22.0).is_err());
    }

    #[test]
    fn test_timestamps_round_trip() {
        let store = SqliteHistory::open_in_memory().expect("Failed to create in-memory store");
        let stamp = Utc::now();
        store
            .append("temperature", stamp, 21.0)
            .expect("Failed to append row");

        let rows = store.recent("temperature", 1).expect("Failed to query");
        // RFC 3339 text keeps sub-second precision, so the stamp survives.
        assert_eq!(rows[0].recorded_at, stamp);
    }
}
