use std::collections::VecDeque;

use ahash::AHashMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::model::{IntradayBatch, PricePoint, SnapshotBatch, Symbol};

/// How a poll result is folded into the cached series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMode {
    /// Service only knows the latest price; history accumulates locally.
    #[default]
    Append,
    /// Service returns a recent window per symbol; it replaces ours.
    Replace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesStatus {
    /// Fewer than two points, nothing to draw yet
    Collecting,
    Ready,
}

// Time-ascending, capacity-bounded series for one symbol
#[derive(Debug, Clone, PartialEq)]
pub struct HistorySeries {
    points: VecDeque<PricePoint>,
    capacity: usize,
}

impl HistorySeries {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { points: VecDeque::with_capacity(capacity), capacity }
    }

    /// Appends at the newest end, evicting from the oldest end on overflow.
    /// A point older than the current tail is refused.
    pub fn push(&mut self, point: PricePoint) -> bool {
        if let Some(last) = self.points.back() {
            if point.timestamp() < last.timestamp() {
                return false;
            }
        }
        self.points.push_back(point);
        while self.points.len() > self.capacity {
            self.points.pop_front();
        }
        true
    }

    /// Replace the whole series with a fresh window, keeping its newest
    /// `capacity` points.
    pub fn replace_with(&mut self, window: &[PricePoint]) {
        let mut fresh: Vec<PricePoint> = window.to_vec();
        if !fresh.windows(2).all(|w| w[0].timestamp() <= w[1].timestamp()) {
            fresh.sort_by_key(|p| p.timestamp());
        }
        let skip = fresh.len().saturating_sub(self.capacity);
        self.points.clear();
        self.points.extend(fresh.into_iter().skip(skip));
    }

    pub fn status(&self) -> SeriesStatus {
        if self.points.len() >= 2 {
            SeriesStatus::Ready
        } else {
            SeriesStatus::Collecting
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &PricePoint> + ExactSizeIterator {
        self.points.iter()
    }

    pub fn to_vec(&self) -> Vec<PricePoint> {
        self.points.iter().copied().collect()
    }

    /// Newest `n` points, still oldest first.
    pub fn tail(&self, n: usize) -> Vec<PricePoint> {
        let skip = self.points.len().saturating_sub(n);
        self.points.iter().skip(skip).copied().collect()
    }
}

/// Fold `incoming` into `current`. Series are created lazily on their first
/// point; in replace mode an empty window drops the series.
pub fn merge(
    current: &mut AHashMap<Symbol, HistorySeries>,
    incoming: &IntradayBatch,
    capacity: usize,
    mode: MergeMode,
) {
    for (symbol, points) in &incoming.series {
        match mode {
            MergeMode::Append => {
                if points.is_empty() {
                    continue;
                }
                let series = current
                    .entry(symbol.clone())
                    .or_insert_with(|| HistorySeries::new(capacity));
                for point in points {
                    if !series.push(*point) {
                        trace!(%symbol, ts = %point.timestamp(), "refusing out-of-order point");
                    }
                }
            }
            MergeMode::Replace => {
                if points.is_empty() {
                    current.remove(symbol);
                    continue;
                }
                current
                    .entry(symbol.clone())
                    .or_insert_with(|| HistorySeries::new(capacity))
                    .replace_with(points);
            }
        }
    }
}

/// One numeric point per symbol, stamped `at`. Opaque prices are skipped.
pub fn latest_points(snapshot: &SnapshotBatch, at: DateTime<Utc>) -> IntradayBatch {
    let mut batch = IntradayBatch::default();
    for (symbol, value) in &snapshot.prices {
        if let Some(point) = value.as_numeric().and_then(|price| PricePoint::new(at, price)) {
            batch.series.insert(symbol.clone(), vec![point]);
        }
    }
    batch
}

/// Per-view store of rolling series.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    series: AHashMap<Symbol, HistorySeries>,
    capacity: usize,
    mode: MergeMode,
}

impl HistoryStore {
    pub fn new(capacity: usize, mode: MergeMode) -> Self {
        Self { series: AHashMap::new(), capacity: capacity.max(1), mode }
    }

    pub fn merge(&mut self, incoming: &IntradayBatch) {
        merge(&mut self.series, incoming, self.capacity, self.mode);
    }

    /// Drop every series whose symbol fails `keep`.
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&Symbol) -> bool,
    {
        let before = self.series.len();
        self.series.retain(|symbol, _| keep(symbol));
        let dropped = before - self.series.len();
        if dropped > 0 {
            debug!(dropped, remaining = self.series.len(), "released untracked series");
        }
    }

    pub fn forget(&mut self, symbol: &Symbol) -> Option<HistorySeries> {
        self.series.remove(symbol)
    }

    pub fn get(&self, symbol: &Symbol) -> Option<&HistorySeries> {
        self.series.get(symbol)
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}
