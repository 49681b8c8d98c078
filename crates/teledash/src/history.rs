// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bounded rolling history for charting.
//!
//! The history is consumer-owned: the driver loop derives one
//! [`HistoryPoint`] per refresh from a store snapshot and appends it
//! here. No lock is involved; memory stays bounded by evicting the
//! oldest points once the capacity is reached.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};

/// Default rolling history capacity in points.
pub const MAX_POINTS: usize = 200;

/// One charted row: a timestamp plus the value of each tracked series
/// at that instant. A missing series value stays `None` so charts
/// render a gap instead of a fake zero.
#[derive(Debug, Clone)]
pub struct HistoryPoint {
    /// Derivation timestamp
    pub time: DateTime<Utc>,
    series: HashMap<String, Option<f64>>,
}

impl HistoryPoint {
    /// Create an empty point stamped `time`.
    pub fn new(time: DateTime<Utc>) -> Self {
        Self {
            time,
            series: HashMap::new(),
        }
    }

    /// Create an empty point stamped with the current time.
    pub fn now() -> Self {
        Self::new(Utc::now())
    }

    /// Attach a series value (or an explicit gap) to this point.
    pub fn with_series(mut self, name: impl Into<String>, value: Option<f64>) -> Self {
        self.series.insert(name.into(), value);
        self
    }

    /// Value of `name` at this point, `None` for gaps and untracked series.
    pub fn value(&self, name: &str) -> Option<f64> {
        self.series.get(name).copied().flatten()
    }

    /// True when at least one series resolved to a value.
    pub fn has_any_value(&self) -> bool {
        self.series.values().any(|v| v.is_some())
    }
}

/// Bounded FIFO of history points.
pub struct RollingHistory {
    points: VecDeque<HistoryPoint>,
    capacity: usize,
}

impl Default for RollingHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl RollingHistory {
    /// Create a history with the default capacity ([`MAX_POINTS`]).
    pub fn new() -> Self {
        Self::with_capacity(MAX_POINTS)
    }

    /// Create a history bounded to `capacity` points (clamped to >= 1).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            points: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a point, evicting the oldest points once full.
    pub fn push(&mut self, point: HistoryPoint) {
        while self.points.len() >= self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(point);
    }

    /// Append only when the point carries at least one resolved value.
    /// Returns whether the point was kept.
    pub fn push_if_any_value(&mut self, point: HistoryPoint) -> bool {
        if point.has_any_value() {
            self.push(point);
            true
        } else {
            false
        }
    }

    /// Number of retained points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// True when no point has been retained yet.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Configured capacity bound.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest-to-newest iteration.
    pub fn iter(&self) -> impl Iterator<Item = &HistoryPoint> {
        self.points.iter()
    }

    /// Most recently appended point.
    pub fn latest(&self) -> Option<&HistoryPoint> {
        self.points.back()
    }

    /// Extract one series as a column, oldest first, gaps preserved.
    pub fn series(&self, name: &str) -> Vec<Option<f64>> {
        self.points.iter().map(|p| p.value(name)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(temp: Option<f64>, lum: Option<f64>) -> HistoryPoint {
        HistoryPoint::now()
            .with_series("temperature", temp)
            .with_series("luminosity", lum)
    }

    #[test]
    fn test_default_capacity() {
        let history = RollingHistory::new();
        assert_eq!(history.capacity(), MAX_POINTS);
        assert!(history.is_empty());
    }

    #[test]
    fn test_fifo_eviction_at_capacity() {
        let mut history = RollingHistory::with_capacity(3);
        history.push(point(Some(1.0), None));
        history.push(point(Some(2.0), None));
        history.push(point(Some(3.0), None));
        history.push(point(Some(4.0), None));

        assert_eq!(history.len(), 3);
        let temps = history.series("temperature");
        assert_eq!(temps, vec![Some(2.0), Some(3.0), Some(4.0)]);
        assert_eq!(history.latest().and_then(|p| p.value("temperature")), Some(4.0));
    }

    #[test]
    fn test_push_if_any_value_skips_empty_points() {
        let mut history = RollingHistory::with_capacity(10);

        assert!(!history.push_if_any_value(point(None, None)));
        assert!(history.push_if_any_value(point(Some(21.5), None)));
        assert!(history.push_if_any_value(point(None, Some(512.0))));

        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_series_column_preserves_gaps() {
        let mut history = RollingHistory::with_capacity(10);
        history.push(point(Some(21.0), Some(500.0)));
        history.push(point(None, Some(510.0)));
        history.push(point(Some(22.0), None));

        assert_eq!(
            history.series("temperature"),
            vec![Some(21.0), None, Some(22.0)]
        );
        assert_eq!(
            history.series("luminosity"),
            vec![Some(500.0), Some(510.0), None]
        );
        // Untracked series read as all gaps.
        assert_eq!(history.series("flame"), vec![None, None, None]);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let mut history = RollingHistory::with_capacity(0);
        history.push(point(Some(1.0), None));
        history.push(point(Some(2.0), None));

        assert_eq!(history.capacity(), 1);
        assert_eq!(history.len(), 1);
        assert_eq!(history.series("temperature"), vec![Some(2.0)]);
    }
}
