//! Keyboard timing collector.
//!
//! Tracks dwell (press to matching release) and flight (previous release to
//! next press). A press still held at flush time is dropped with the rest of
//! the window state.

use crate::collector::capture::{CaptureWorker, Source};
use crate::collector::types::{seconds_between, KeyEvent, KeyKind, RawEvent};
use crate::collector::{lock_state, SignalCollector};
use crate::core::features::{mean_or_zero, FeatureWindow};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const KEY_COUNT: &str = "key_count";
pub const UNIQUE_KEYS: &str = "unique_keys";
pub const DWELL_MEAN: &str = "dwell_mean";
pub const FLIGHT_MEAN: &str = "flight_mean";
pub const KEY_RATE: &str = "key_rate";

/// Buffered keyboard state for the current window.
#[derive(Debug, Default)]
struct KeyboardState {
    press_times: HashMap<u32, DateTime<Utc>>,
    dwell_times: Vec<f64>,
    flight_times: Vec<f64>,
    keys_pressed: Vec<u32>,
    last_release: Option<DateTime<Utc>>,
}

impl KeyboardState {
    fn record(&mut self, event: &KeyEvent) {
        match event.kind {
            KeyKind::Down => {
                self.press_times.insert(event.key, event.timestamp);
                self.keys_pressed.push(event.key);
                if let Some(released) = self.last_release {
                    self.flight_times
                        .push(seconds_between(released, event.timestamp));
                }
            }
            KeyKind::Up => {
                if let Some(pressed) = self.press_times.remove(&event.key) {
                    self.dwell_times
                        .push(seconds_between(pressed, event.timestamp));
                }
                self.last_release = Some(event.timestamp);
            }
        }
    }

    fn features(&self, window_secs: f64) -> FeatureWindow {
        let key_count = self.keys_pressed.len() as f64;
        let unique_keys = self.keys_pressed.iter().collect::<HashSet<_>>().len() as f64;
        let key_rate = if window_secs > 0.0 {
            key_count / window_secs
        } else {
            0.0
        };

        FeatureWindow::new()
            .with(KEY_COUNT, key_count)
            .with(UNIQUE_KEYS, unique_keys)
            .with(DWELL_MEAN, mean_or_zero(&self.dwell_times))
            .with(FLIGHT_MEAN, mean_or_zero(&self.flight_times))
            .with(KEY_RATE, key_rate)
    }

    fn clear(&mut self) {
        self.press_times.clear();
        self.dwell_times.clear();
        self.flight_times.clear();
        self.keys_pressed.clear();
        self.last_release = None;
    }
}

/// Collector for key dwell/flight timing.
pub struct KeyboardCollector {
    state: Arc<Mutex<KeyboardState>>,
    window: Duration,
    worker: Mutex<Option<CaptureWorker>>,
}

impl KeyboardCollector {
    /// Create a collector whose `key_rate` is normalized by `window`.
    pub fn new(window: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(KeyboardState::default())),
            window,
            worker: Mutex::new(None),
        }
    }

    /// Buffer one event. Non-keyboard events are ignored.
    pub fn record(&self, event: &RawEvent) {
        if let RawEvent::Key(key) = event {
            lock_state(&self.state).record(key);
        }
    }

    /// Stop the background capture, if running.
    pub fn stop(&self) {
        if let Some(mut worker) = lock_state(&self.worker).take() {
            worker.stop();
        }
    }
}

impl SignalCollector for KeyboardCollector {
    fn name(&self) -> &'static str {
        "keyboard"
    }

    fn start(&self) {
        let mut worker = lock_state(&self.worker);
        if worker.is_some() {
            return;
        }
        let state = Arc::clone(&self.state);
        *worker = CaptureWorker::spawn(Source::Keyboard, move |event| {
            if let RawEvent::Key(key) = &event {
                lock_state(&state).record(key);
            }
        });
    }

    fn flush(&self) -> FeatureWindow {
        let mut state = lock_state(&self.state);
        let features = state.features(self.window.as_secs_f64());
        state.clear();
        features
    }

    fn reset(&self) {
        lock_state(&self.state).clear();
    }
}

impl Drop for KeyboardCollector {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn key(kind: KeyKind, key: u32, base: DateTime<Utc>, offset_ms: i64) -> RawEvent {
        RawEvent::Key(KeyEvent {
            kind,
            key,
            timestamp: base + ChronoDuration::milliseconds(offset_ms),
        })
    }

    #[test]
    fn test_dwell_mean_of_matched_pairs() {
        let collector = KeyboardCollector::new(Duration::from_secs(3));
        let t0 = Utc::now();

        collector.record(&key(KeyKind::Down, 1, t0, 0));
        collector.record(&key(KeyKind::Up, 1, t0, 100));
        collector.record(&key(KeyKind::Down, 2, t0, 300));
        collector.record(&key(KeyKind::Up, 2, t0, 420));
        collector.record(&key(KeyKind::Down, 3, t0, 600));
        collector.record(&key(KeyKind::Up, 3, t0, 690));

        let features = collector.flush();
        assert!((features.get_or_zero(DWELL_MEAN) - 0.103_333).abs() < 1e-4);
        assert_eq!(features.get(KEY_COUNT), Some(3.0));
        assert_eq!(features.get(UNIQUE_KEYS), Some(3.0));
        assert!((features.get_or_zero(KEY_RATE) - 1.0).abs() < 1e-9);
        // flights: 300-100, 600-420
        assert!((features.get_or_zero(FLIGHT_MEAN) - 0.19).abs() < 1e-6);
    }

    #[test]
    fn test_unmatched_press_is_dropped() {
        let collector = KeyboardCollector::new(Duration::from_secs(3));
        let t0 = Utc::now();

        collector.record(&key(KeyKind::Down, 1, t0, 0));
        collector.record(&key(KeyKind::Up, 1, t0, 100));
        collector.record(&key(KeyKind::Down, 2, t0, 200));

        let features = collector.flush();
        assert!((features.get_or_zero(DWELL_MEAN) - 0.1).abs() < 1e-9);

        // The held key's release arrives in the next window and has no
        // matching press there.
        collector.record(&key(KeyKind::Up, 2, t0, 3100));
        let features = collector.flush();
        assert_eq!(features.get(DWELL_MEAN), Some(0.0));
        assert_eq!(features.get(KEY_COUNT), Some(0.0));
    }

    #[test]
    fn test_flush_is_idempotent_without_input() {
        let collector = KeyboardCollector::new(Duration::from_secs(3));
        collector.record(&RawEvent::key_down(7));

        collector.flush();
        let first = collector.flush();
        let second = collector.flush();

        assert_eq!(first, second);
        assert_eq!(first.get(KEY_COUNT), Some(0.0));
        assert_eq!(first.get(UNIQUE_KEYS), Some(0.0));
        assert_eq!(first.get(DWELL_MEAN), Some(0.0));
        assert_eq!(first.get(FLIGHT_MEAN), Some(0.0));
        assert_eq!(first.get(KEY_RATE), Some(0.0));
    }

    #[test]
    fn test_repeated_key_counts_once_in_unique_keys() {
        let collector = KeyboardCollector::new(Duration::from_secs(3));
        for _ in 0..4 {
            collector.record(&RawEvent::key_down(9));
            collector.record(&RawEvent::key_up(9));
        }
        let features = collector.flush();
        assert_eq!(features.get(KEY_COUNT), Some(4.0));
        assert_eq!(features.get(UNIQUE_KEYS), Some(1.0));
    }

    #[test]
    fn test_mouse_events_are_ignored() {
        let collector = KeyboardCollector::new(Duration::from_secs(3));
        collector.record(&RawEvent::movement(10.0, 10.0));
        collector.record(&RawEvent::click(true));
        assert_eq!(collector.flush().get(KEY_COUNT), Some(0.0));
    }

    #[test]
    fn test_reset_discards_buffered_events() {
        let collector = KeyboardCollector::new(Duration::from_secs(3));
        collector.record(&RawEvent::key_down(1));
        collector.reset();
        assert_eq!(collector.flush().get(KEY_COUNT), Some(0.0));
    }

    #[test]
    fn test_concurrent_flush_loses_no_presses() {
        const PAIRS: u32 = 5_000;
        let collector = Arc::new(KeyboardCollector::new(Duration::from_secs(3)));

        let producer = {
            let collector = Arc::clone(&collector);
            std::thread::spawn(move || {
                for i in 0..PAIRS {
                    collector.record(&RawEvent::key_down(i % 26));
                    collector.record(&RawEvent::key_up(i % 26));
                }
            })
        };

        let mut total = 0.0;
        while !producer.is_finished() {
            total += collector.flush().get_or_zero(KEY_COUNT);
        }
        producer.join().unwrap();
        total += collector.flush().get_or_zero(KEY_COUNT);

        assert_eq!(total, PAIRS as f64);
    }
}
