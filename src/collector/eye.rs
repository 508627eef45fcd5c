//! Eye-openness collector.
//!
//! A sampler thread pulls one eye aspect ratio (EAR) per tick from a
//! [`LandmarkProvider`] and appends it to the window buffer, counting blinks
//! on the way. Without a provider the collector runs in degraded mode and
//! always flushes `{eye_aspect_mean: 0.0, eye_blink_rate: 0}`.

use crate::collector::types::{seconds_between, EyeSample};
use crate::collector::{lock_state, SignalCollector};
use crate::core::features::{mean_or_zero, FeatureWindow};
use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const EYE_ASPECT_MEAN: &str = "eye_aspect_mean";
pub const EYE_BLINK_RATE: &str = "eye_blink_rate";

/// EAR below this value counts as a closed eye.
pub const BLINK_THRESH: f64 = 0.21;

/// Minimum seconds between two registered blinks.
pub const MIN_BLINK_GAP: f64 = 0.25;

/// Default sampling period (~30 Hz).
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(30);

/// Source of per-frame eye aspect ratios.
pub trait LandmarkProvider: Send {
    /// EAR for the current frame, or `None` when no frame is available.
    /// Must not block for longer than a sampling tick.
    fn next_ear(&mut self) -> Option<f64>;
}

/// Eye aspect ratio from six eye-contour landmarks.
///
/// Points are ordered outer corner, two upper-lid points, inner corner, two
/// lower-lid points. Returns `None` when the corners coincide.
pub fn eye_aspect_ratio(points: &[(f64, f64); 6]) -> Option<f64> {
    let dist = |a: (f64, f64), b: (f64, f64)| (a.0 - b.0).hypot(a.1 - b.1);
    let vertical_a = dist(points[1], points[5]);
    let vertical_b = dist(points[2], points[4]);
    let horizontal = dist(points[0], points[3]);
    if horizontal <= f64::EPSILON {
        return None;
    }
    Some((vertical_a + vertical_b) / (2.0 * horizontal))
}

#[derive(Debug, Default)]
struct EyeState {
    samples: Vec<EyeSample>,
    blinks: u32,
    prev_ear: Option<f64>,
    last_blink: Option<DateTime<Utc>>,
}

impl EyeState {
    fn record(&mut self, sample: EyeSample) {
        if sample.ear < BLINK_THRESH && self.prev_ear.is_some_and(|prev| prev >= BLINK_THRESH) {
            let debounced = self
                .last_blink
                .map_or(true, |last| seconds_between(last, sample.timestamp) >= MIN_BLINK_GAP);
            if debounced {
                self.blinks += 1;
                self.last_blink = Some(sample.timestamp);
            }
        }
        self.prev_ear = Some(sample.ear);
        self.samples.push(sample);
    }

    fn features(&self) -> FeatureWindow {
        let ears: Vec<f64> = self.samples.iter().map(|s| s.ear).collect();
        FeatureWindow::new()
            .with(EYE_ASPECT_MEAN, mean_or_zero(&ears))
            .with(EYE_BLINK_RATE, self.blinks as f64)
    }

    /// End the window. `last_blink` survives so the debounce gap holds
    /// across window boundaries.
    fn clear(&mut self) {
        self.samples.clear();
        self.blinks = 0;
        self.prev_ear = None;
    }
}

struct Sampler {
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<Box<dyn LandmarkProvider>>,
}

/// Collector for EAR mean and blink count.
pub struct EyeCollector {
    state: Arc<Mutex<EyeState>>,
    provider: Mutex<Option<Box<dyn LandmarkProvider>>>,
    sampler: Mutex<Option<Sampler>>,
    interval: Duration,
    degraded: bool,
}

impl EyeCollector {
    /// Collector sampling `provider` every `interval`.
    pub fn new(provider: Box<dyn LandmarkProvider>, interval: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(EyeState::default())),
            provider: Mutex::new(Some(provider)),
            sampler: Mutex::new(None),
            interval,
            degraded: false,
        }
    }

    /// Collector with no landmark source; flushes constant zeros.
    pub fn degraded() -> Self {
        Self {
            state: Arc::new(Mutex::new(EyeState::default())),
            provider: Mutex::new(None),
            sampler: Mutex::new(None),
            interval: DEFAULT_SAMPLE_INTERVAL,
            degraded: true,
        }
    }

    /// Build from an optional provider, falling back to degraded mode.
    pub fn from_provider(
        provider: Option<Box<dyn LandmarkProvider>>,
        interval: Duration,
    ) -> Self {
        match provider {
            Some(p) => Self::new(p, interval),
            None => {
                warn!("no landmark provider available, eye collector running in degraded mode");
                Self::degraded()
            }
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Record one EAR reading. Ignored in degraded mode and for non-finite
    /// values.
    pub fn record_ear(&self, ear: f64, timestamp: DateTime<Utc>) {
        if self.degraded || !ear.is_finite() {
            return;
        }
        lock_state(&self.state).record(EyeSample { ear, timestamp });
    }

    /// Cancel the sampler thread. The provider is kept so the collector can
    /// be started again.
    pub fn stop(&self) {
        let Some(sampler) = lock_state(&self.sampler).take() else {
            return;
        };
        sampler.cancel.store(true, Ordering::SeqCst);
        match sampler.handle.join() {
            Ok(provider) => *lock_state(&self.provider) = Some(provider),
            Err(_) => warn!("eye sampler panicked; provider discarded"),
        }
        info!("eye sampler stopped");
    }
}

impl SignalCollector for EyeCollector {
    fn name(&self) -> &'static str {
        "eye"
    }

    fn start(&self) {
        if self.degraded {
            return;
        }
        let mut sampler = lock_state(&self.sampler);
        if sampler.is_some() {
            return;
        }
        let Some(mut provider) = lock_state(&self.provider).take() else {
            return;
        };

        let cancel = Arc::new(AtomicBool::new(false));
        let flag = cancel.clone();
        let state = Arc::clone(&self.state);
        let interval = self.interval;

        let spawned = thread::Builder::new()
            .name("eye-sampler".to_string())
            .spawn(move || {
                while !flag.load(Ordering::SeqCst) {
                    if let Some(ear) = provider.next_ear().filter(|e| e.is_finite()) {
                        lock_state(&state).record(EyeSample {
                            ear,
                            timestamp: Utc::now(),
                        });
                    }
                    thread::sleep(interval);
                }
                provider
            });

        match spawned {
            Ok(handle) => {
                info!("eye sampler started ({} ms interval)", interval.as_millis());
                *sampler = Some(Sampler { cancel, handle });
            }
            Err(e) => warn!("eye sampler failed to start: {e}"),
        }
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

impl Drop for EyeCollector {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Provider fed by a line-oriented stream from an external face-geometry
/// process (a file or named pipe).
///
/// Each line is one EAR value, twelve numbers (six `x y` landmark pairs), or
/// `none`/blank for a frame without a face. A reader thread keeps only the
/// most recent value; each value is handed out at most once.
pub struct EarStreamProvider {
    latest: Arc<Mutex<Option<f64>>>,
}

impl EarStreamProvider {
    /// Read from `path` on a background thread.
    ///
    /// The open happens on that thread: a named pipe blocks until its writer
    /// connects, and until then `next_ear()` reports no frame. An open
    /// failure is logged and leaves the provider without frames.
    pub fn open(path: &Path) -> io::Result<Self> {
        // Stat does not block on a pipe; a missing source fails up front.
        std::fs::metadata(path)?;
        let path = path.to_path_buf();
        Self::spawn_reader(move |slot| {
            let file = match File::open(&path) {
                Ok(file) => file,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "could not open eye source");
                    return;
                }
            };
            info!("reading eye landmarks from {}", path.display());
            pump_lines(BufReader::new(file), &slot);
        })
    }

    pub fn from_reader<R>(reader: R) -> io::Result<Self>
    where
        R: BufRead + Send + 'static,
    {
        Self::spawn_reader(move |slot| pump_lines(reader, &slot))
    }

    fn spawn_reader<F>(read: F) -> io::Result<Self>
    where
        F: FnOnce(Arc<Mutex<Option<f64>>>) + Send + 'static,
    {
        let latest = Arc::new(Mutex::new(None));
        let slot = latest.clone();

        // Detached: a blocked pipe read must not hold up shutdown.
        thread::Builder::new()
            .name("ear-stream-reader".to_string())
            .spawn(move || read(slot))?;

        Ok(Self { latest })
    }
}

fn pump_lines<R: BufRead>(reader: R, slot: &Mutex<Option<f64>>) {
    for line in reader.lines() {
        let Ok(line) = line else { break };
        *lock_state(slot) = parse_ear_line(&line);
    }
    debug!("ear stream reached end of input");
}

impl LandmarkProvider for EarStreamProvider {
    fn next_ear(&mut self) -> Option<f64> {
        lock_state(&self.latest).take()
    }
}

fn parse_ear_line(line: &str) -> Option<f64> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
        return None;
    }

    let values: Vec<f64> = trimmed
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect::<Result<_, _>>()
        .ok()?;

    match values.as_slice() {
        [ear] => Some(*ear),
        [x0, y0, x1, y1, x2, y2, x3, y3, x4, y4, x5, y5] => eye_aspect_ratio(&[
            (*x0, *y0),
            (*x1, *y1),
            (*x2, *y2),
            (*x3, *y3),
            (*x4, *y4),
            (*x5, *y5),
        ]),
        _ => {
            debug!("ignoring malformed landmark line with {} values", values.len());
            None
        }
    }
}
