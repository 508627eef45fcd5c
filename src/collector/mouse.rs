//! Pointer motion and click collector.

use crate::collector::capture::{CaptureWorker, Source};
use crate::collector::types::{seconds_between, MoveEvent, RawEvent};
use crate::collector::{lock_state, SignalCollector};
use crate::core::features::{mean_or_zero, FeatureWindow};
use std::sync::{Arc, Mutex};

pub const MOUSE_SPEED_MEAN: &str = "mouse_speed_mean";
pub const MOUSE_CLICKS: &str = "mouse_clicks";

#[derive(Debug, Default)]
struct MouseState {
    positions: Vec<MoveEvent>,
    clicks: u32,
}

impl MouseState {
    fn record(&mut self, event: &RawEvent) {
        match event {
            RawEvent::Move(m) => self.positions.push(m.clone()),
            RawEvent::Click(c) if c.pressed => self.clicks += 1,
            _ => {}
        }
    }

    /// Speeds between consecutive samples, in pixels per second. Pairs with
    /// no elapsed time are skipped.
    fn speeds(&self) -> Vec<f64> {
        self.positions
            .windows(2)
            .filter_map(|pair| {
                let dt = seconds_between(pair[0].timestamp, pair[1].timestamp);
                if dt <= 0.0 {
                    return None;
                }
                let distance = (pair[1].x - pair[0].x).hypot(pair[1].y - pair[0].y);
                Some(distance / dt)
            })
            .collect()
    }

    fn features(&self) -> FeatureWindow {
        FeatureWindow::new()
            .with(MOUSE_SPEED_MEAN, mean_or_zero(&self.speeds()))
            .with(MOUSE_CLICKS, self.clicks as f64)
    }

    fn clear(&mut self) {
        self.positions.clear();
        self.clicks = 0;
    }
}

/// Collector for pointer speed and click counts.
pub struct MouseCollector {
    state: Arc<Mutex<MouseState>>,
    worker: Mutex<Option<CaptureWorker>>,
}

impl MouseCollector {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MouseState::default())),
            worker: Mutex::new(None),
        }
    }

    /// Buffer one event. Keyboard events are ignored.
    pub fn record(&self, event: &RawEvent) {
        lock_state(&self.state).record(event);
    }

    pub fn stop(&self) {
        if let Some(mut worker) = lock_state(&self.worker).take() {
            worker.stop();
        }
    }
}

impl Default for MouseCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalCollector for MouseCollector {
    fn name(&self) -> &'static str {
        "mouse"
    }

    fn start(&self) {
        let mut worker = lock_state(&self.worker);
        if worker.is_some() {
            return;
        }
        let state = Arc::clone(&self.state);
        *worker = CaptureWorker::spawn(Source::Mouse, move |event| {
            lock_state(&state).record(&event);
        });
    }

    fn flush(&self) -> FeatureWindow {
        let mut state = lock_state(&self.state);
        let features = state.features();
        state.clear();
        features
    }

    fn reset(&self) {
        lock_state(&self.state).clear();
    }
}

impl Drop for MouseCollector {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::types::ClickEvent;
    use chrono::{DateTime, Duration, Utc};

    fn move_at(x: f64, y: f64, base: DateTime<Utc>, offset_ms: i64) -> RawEvent {
        RawEvent::Move(MoveEvent {
            x,
            y,
            timestamp: base + Duration::milliseconds(offset_ms),
        })
    }

    #[test]
    fn test_speed_mean() {
        let collector = MouseCollector::new();
        let t0 = Utc::now();

        collector.record(&move_at(0.0, 0.0, t0, 0));
        collector.record(&move_at(3.0, 4.0, t0, 100)); // 5px / 0.1s = 50
        collector.record(&move_at(3.0, 14.0, t0, 200)); // 10px / 0.1s = 100

        let features = collector.flush();
        assert!((features.get_or_zero(MOUSE_SPEED_MEAN) - 75.0).abs() < 1e-6);
    }

    #[test]
    fn test_single_sample_has_zero_speed() {
        let collector = MouseCollector::new();
        collector.record(&RawEvent::movement(10.0, 10.0));
        assert_eq!(collector.flush().get(MOUSE_SPEED_MEAN), Some(0.0));
    }

    #[test]
    fn test_zero_dt_pairs_are_skipped() {
        let collector = MouseCollector::new();
        let t0 = Utc::now();
        collector.record(&move_at(0.0, 0.0, t0, 0));
        collector.record(&move_at(50.0, 0.0, t0, 0));
        assert_eq!(collector.flush().get(MOUSE_SPEED_MEAN), Some(0.0));
    }

    #[test]
    fn test_counts_only_presses() {
        let collector = MouseCollector::new();
        collector.record(&RawEvent::click(true));
        collector.record(&RawEvent::click(false));
        collector.record(&RawEvent::Click(ClickEvent {
            pressed: true,
            timestamp: Utc::now(),
        }));
        collector.record(&RawEvent::key_down(1));

        assert_eq!(collector.flush().get(MOUSE_CLICKS), Some(2.0));
    }

    #[test]
    fn test_flush_resets_window() {
        let collector = MouseCollector::new();
        let t0 = Utc::now();
        collector.record(&move_at(0.0, 0.0, t0, 0));
        collector.record(&move_at(10.0, 0.0, t0, 100));
        collector.record(&RawEvent::click(true));
        collector.flush();

        let empty = collector.flush();
        assert_eq!(empty.get(MOUSE_SPEED_MEAN), Some(0.0));
        assert_eq!(empty.get(MOUSE_CLICKS), Some(0.0));
        assert_eq!(empty, collector.flush());
    }

    #[test]
    fn test_concurrent_flush_loses_no_clicks() {
        const CLICKS: usize = 5_000;
        let collector = Arc::new(MouseCollector::new());

        let producer = {
            let collector = Arc::clone(&collector);
            std::thread::spawn(move || {
                for _ in 0..CLICKS {
                    collector.record(&RawEvent::click(true));
                }
            })
        };

        let mut total = 0.0;
        while !producer.is_finished() {
            total += collector.flush().get_or_zero(MOUSE_CLICKS);
        }
        producer.join().unwrap();
        total += collector.flush().get_or_zero(MOUSE_CLICKS);

        assert_eq!(total, CLICKS as f64);
    }
}
