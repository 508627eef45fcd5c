//! Rolling prediction history.

use serde::Serialize;
use std::collections::VecDeque;

/// Default number of records kept.
pub const DEFAULT_CAPACITY: usize = 60;

/// One classified window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PredictionRecord {
    /// Unix time in seconds.
    pub time: f64,
    pub label: i64,
}

impl PredictionRecord {
    pub fn now(label: i64) -> Self {
        let now = chrono::Utc::now();
        Self {
            time: now.timestamp_millis() as f64 / 1000.0,
            label,
        }
    }
}

/// Fixed-capacity FIFO; pushing into a full history evicts the oldest
/// record.
#[derive(Debug, Clone)]
pub struct PredictionHistory {
    records: VecDeque<PredictionRecord>,
    capacity: usize,
}

impl PredictionHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, record: PredictionRecord) {
        while self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Oldest-first copy of the current records.
    pub fn snapshot(&self) -> Vec<PredictionRecord> {
        self.records.iter().copied().collect()
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
}

impl Default for PredictionHistory {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
