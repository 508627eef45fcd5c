//! Engine statistics for the current session.

use crate::collector::lock_state;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Counters updated by the live loop and the one-shot endpoints.
#[derive(Debug)]
pub struct EngineStats {
    /// Cycles that produced a broadcast
    cycles_completed: AtomicU64,
    /// Cycles whose aggregation or inference failed
    cycle_failures: AtomicU64,
    /// Payloads handed to the hub
    broadcasts: AtomicU64,
    /// Subscribers removed after a failed delivery
    subscribers_dropped: AtomicU64,
    /// `/predict` and `/predict_live` calls served
    one_shot_predictions: AtomicU64,
    session_start: DateTime<Utc>,
    last_error: Mutex<Option<String>>,
}

/// Point-in-time copy of [`EngineStats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub cycles_completed: u64,
    pub cycle_failures: u64,
    pub broadcasts: u64,
    pub subscribers_dropped: u64,
    pub one_shot_predictions: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
    pub last_error: Option<String>,
}

impl EngineStats {
    pub fn new() -> Self {
        Self {
            cycles_completed: AtomicU64::new(0),
            cycle_failures: AtomicU64::new(0),
            broadcasts: AtomicU64::new(0),
            subscribers_dropped: AtomicU64::new(0),
            one_shot_predictions: AtomicU64::new(0),
            session_start: Utc::now(),
            last_error: Mutex::new(None),
        }
    }

    pub fn record_cycle(&self) {
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed cycle and keep its message as the last error.
    pub fn record_failure(&self, message: impl Into<String>) {
        self.cycle_failures.fetch_add(1, Ordering::Relaxed);
        *lock_state(&self.last_error) = Some(message.into());
    }

    pub fn record_broadcast(&self, dropped: usize) {
        self.broadcasts.fetch_add(1, Ordering::Relaxed);
        self.subscribers_dropped
            .fetch_add(dropped as u64, Ordering::Relaxed);
    }

    pub fn record_one_shot(&self) {
        self.one_shot_predictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cycles_completed: self.cycles_completed.load(Ordering::Relaxed),
            cycle_failures: self.cycle_failures.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            subscribers_dropped: self.subscribers_dropped.load(Ordering::Relaxed),
            one_shot_predictions: self.one_shot_predictions.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
            last_error: lock_state(&self.last_error).clone(),
        }
    }

    /// Human-readable summary for the shutdown log.
    pub fn summary(&self) -> String {
        let stats = self.snapshot();
        format!(
            "Session Statistics:\n\
             - Cycles completed: {}\n\
             - Cycle failures: {}\n\
             - Broadcasts sent: {}\n\
             - Subscribers dropped: {}\n\
             - One-shot predictions: {}\n\
             - Session duration: {} seconds",
            stats.cycles_completed,
            stats.cycle_failures,
            stats.broadcasts,
            stats.subscribers_dropped,
            stats.one_shot_predictions,
            stats.session_duration_secs
        )
    }
}

impl Default for EngineStats {
    fn default() -> Self {
        Self::new()
    }
}
