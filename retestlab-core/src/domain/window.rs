//! Bounded window of recent bars with the indicator snapshot each arrived with.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::Bar;
use crate::indicators::IndicatorSnapshot;

/// One admitted bar and its indicator inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarRecord {
    /// Zero-based position of the bar in the stream.
    pub index: usize,
    pub bar: Bar,
    pub indicators: IndicatorSnapshot,
}

/// Fixed-capacity FIFO of the most recent bars.
///
/// Oldest records are evicted on push once `capacity` is reached, so memory
/// stays constant regardless of stream length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarWindow {
    records: VecDeque<BarRecord>,
    capacity: usize,
}

impl BarWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, record: BarRecord) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Record at window position `i` (0 = oldest retained).
    pub fn get(&self, i: usize) -> Option<&BarRecord> {
        self.records.get(i)
    }

    /// Most recent record.
    pub fn last(&self) -> Option<&BarRecord> {
        self.records.back()
    }

    /// Record immediately before the most recent one.
    pub fn previous(&self) -> Option<&BarRecord> {
        let n = self.records.len();
        if n < 2 {
            return None;
        }
        self.records.get(n - 2)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &BarRecord> + ExactSizeIterator {
        self.records.iter()
    }

    /// Closes of the last `n` bars, oldest first. Fewer if the window is shorter.
    pub fn recent_closes(&self, n: usize) -> Vec<f64> {
        let skip = self.records.len().saturating_sub(n);
        self.records.iter().skip(skip).map(|r| r.bar.close).collect()
    }
}
