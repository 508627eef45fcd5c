//! Window aggregation: one blocking wait, then flush every collector and
//! derive the fatigue score.

use crate::collector::eye::{EYE_ASPECT_MEAN, EYE_BLINK_RATE};
use crate::collector::{EyeCollector, KeyboardCollector, MouseCollector, SignalCollector};
use crate::core::features::{FeatureWindow, FATIGUE_SCORE};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::debug;

/// Default sampling window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(3);

/// EAR at or above which the eye contributes nothing to fatigue.
const EAR_OPEN: f64 = 0.28;
/// EAR span over which the eye component ramps from 0 to 1.
const EAR_SPAN: f64 = 0.10;
/// Blinks per window at which the blink component saturates.
const BLINK_SATURATION: f64 = 8.0;
const EAR_WEIGHT: f64 = 0.6;
const BLINK_WEIGHT: f64 = 0.4;

/// Heuristic fatigue score in `[0, 100]`.
///
/// Falls as the eye opens wider and rises with the blink count.
pub fn fatigue_score(eye_aspect_mean: f64, eye_blink_rate: f64) -> f64 {
    let ear_component = ((EAR_OPEN - eye_aspect_mean) / EAR_SPAN).clamp(0.0, 1.0);
    let blink_component = (eye_blink_rate / BLINK_SATURATION).clamp(0.0, 1.0);
    (100.0 * (EAR_WEIGHT * ear_component + BLINK_WEIGHT * blink_component)).round()
}

/// Drives one sampling window over the three collectors.
pub struct Aggregator {
    keyboard: Arc<KeyboardCollector>,
    mouse: Arc<MouseCollector>,
    eye: Arc<EyeCollector>,
    window: Duration,
}

impl Aggregator {
    pub fn new(
        keyboard: Arc<KeyboardCollector>,
        mouse: Arc<MouseCollector>,
        eye: Arc<EyeCollector>,
        window: Duration,
    ) -> Self {
        Self {
            keyboard,
            mouse,
            eye,
            window,
        }
    }

    /// Aggregator with fresh collectors sharing `window`.
    pub fn with_collectors(eye: EyeCollector, window: Duration) -> Self {
        Self::new(
            Arc::new(KeyboardCollector::new(window)),
            Arc::new(MouseCollector::new()),
            Arc::new(eye),
            window,
        )
    }

    /// Start all background producers.
    pub fn start(&self) {
        for collector in self.collectors() {
            collector.start();
        }
    }

    /// Stop all background producers.
    pub fn stop(&self) {
        self.keyboard.stop();
        self.mouse.stop();
        self.eye.stop();
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn keyboard(&self) -> &Arc<KeyboardCollector> {
        &self.keyboard
    }

    pub fn mouse(&self) -> &Arc<MouseCollector> {
        &self.mouse
    }

    pub fn eye(&self) -> &Arc<EyeCollector> {
        &self.eye
    }

    /// Wait one window, then flush and merge every collector.
    pub fn collect_features(&self, label: Option<i64>) -> FeatureWindow {
        thread::sleep(self.window);
        self.flush_window(label)
    }

    /// Flush keyboard, mouse, then eye, merge their subsets, and attach the
    /// fatigue score and optional label.
    pub fn flush_window(&self, label: Option<i64>) -> FeatureWindow {
        let mut features = FeatureWindow::new();
        for collector in self.collectors() {
            features.merge(collector.flush());
        }

        let score = fatigue_score(
            features.get_or_zero(EYE_ASPECT_MEAN),
            features.get_or_zero(EYE_BLINK_RATE),
        );
        features.insert(FATIGUE_SCORE, score);

        if let Some(label) = label {
            features.set_label(label);
        }

        debug!(features = features.len(), fatigue_score = score, "window flushed");
        features
    }

    /// Fixed flush order.
    fn collectors(&self) -> [&dyn SignalCollector; 3] {
        [
            self.keyboard.as_ref(),
            self.mouse.as_ref(),
            self.eye.as_ref(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::keyboard::KEY_COUNT;
    use crate::collector::mouse::MOUSE_CLICKS;
    use crate::collector::{LandmarkProvider, RawEvent};
    use chrono::Utc;
    use proptest::prelude::*;

    struct Silent;

    impl LandmarkProvider for Silent {
        fn next_ear(&mut self) -> Option<f64> {
            None
        }
    }

    fn aggregator() -> Aggregator {
        Aggregator::with_collectors(
            EyeCollector::new(Box::new(Silent), Duration::from_millis(30)),
            Duration::from_millis(20),
        )
    }

    #[test]
    fn test_fatigue_score_example() {
        assert_eq!(fatigue_score(0.18, 5.0), 85.0);
        assert_eq!(fatigue_score(0.30, 0.0), 0.0);
        assert_eq!(fatigue_score(0.0, 20.0), 100.0);
    }

    #[test]
    fn test_flush_window_merges_all_collectors() {
        let agg = aggregator();
        agg.keyboard().record(&RawEvent::key_down(1));
        agg.mouse().record(&RawEvent::click(true));
        let t0 = Utc::now();
        agg.eye().record_ear(0.18, t0);

        let features = agg.flush_window(None);
        assert_eq!(features.get(KEY_COUNT), Some(1.0));
        assert_eq!(features.get(MOUSE_CLICKS), Some(1.0));
        assert!((features.get_or_zero(EYE_ASPECT_MEAN) - 0.18).abs() < 1e-9);
        // ear component 1.0, no blinks
        assert_eq!(features.get(FATIGUE_SCORE), Some(60.0));
        assert_eq!(features.label(), None);
    }

    #[test]
    fn test_empty_window_has_eye_driven_score() {
        // An empty eye window reports EAR 0.0, which reads as fully closed.
        let features = aggregator().flush_window(None);
        assert_eq!(features.get(FATIGUE_SCORE), Some(60.0));
    }

    #[test]
    fn test_collect_features_attaches_label_and_resets() {
        let agg = aggregator();
        agg.keyboard().record(&RawEvent::key_down(3));

        let first = agg.collect_features(Some(2));
        assert_eq!(first.label(), Some(2));
        assert_eq!(first.get(KEY_COUNT), Some(1.0));

        let second = agg.collect_features(None);
        assert_eq!(second.get(KEY_COUNT), Some(0.0));
        assert_eq!(second.label(), None);
    }

    proptest! {
        #[test]
        fn prop_fatigue_score_bounded(ear in -1.0f64..2.0, blinks in 0.0f64..100.0) {
            let score = fatigue_score(ear, blinks);
            prop_assert!((0.0..=100.0).contains(&score));
        }

        #[test]
        fn prop_fatigue_monotone_in_ear(a in 0.0f64..0.5, b in 0.0f64..0.5, blinks in 0.0f64..20.0) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(fatigue_score(hi, blinks) <= fatigue_score(lo, blinks));
        }

        #[test]
        fn prop_fatigue_monotone_in_blinks(ear in 0.0f64..0.5, a in 0u32..30, b in 0u32..30) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(fatigue_score(ear, hi as f64) >= fatigue_score(ear, lo as f64));
        }
    }
}
