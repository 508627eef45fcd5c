//! Raw input event types produced by the platform taps.
//!
//! Events are ephemeral: each one is owned by the collector that buffered it
//! until the next `flush()` consumes it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction of a key transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    Down,
    Up,
}

/// A single key press or release.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyEvent {
    pub kind: KeyKind,
    /// Platform key code; only used to pair presses with releases and to
    /// count distinct keys within a window.
    pub key: u32,
    pub timestamp: DateTime<Utc>,
}

/// An absolute pointer position sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveEvent {
    pub x: f64,
    pub y: f64,
    pub timestamp: DateTime<Utc>,
}

/// A pointer button transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickEvent {
    pub pressed: bool,
    pub timestamp: DateTime<Utc>,
}

/// Unified event type emitted by an input tap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RawEvent {
    Key(KeyEvent),
    Move(MoveEvent),
    Click(ClickEvent),
}

impl RawEvent {
    pub fn key_down(key: u32) -> Self {
        RawEvent::Key(KeyEvent {
            kind: KeyKind::Down,
            key,
            timestamp: Utc::now(),
        })
    }

    pub fn key_up(key: u32) -> Self {
        RawEvent::Key(KeyEvent {
            kind: KeyKind::Up,
            key,
            timestamp: Utc::now(),
        })
    }

    pub fn movement(x: f64, y: f64) -> Self {
        RawEvent::Move(MoveEvent {
            x,
            y,
            timestamp: Utc::now(),
        })
    }

    pub fn click(pressed: bool) -> Self {
        RawEvent::Click(ClickEvent {
            pressed,
            timestamp: Utc::now(),
        })
    }

    /// Whether this event belongs to the keyboard source.
    pub fn is_keyboard(&self) -> bool {
        matches!(self, RawEvent::Key(_))
    }
}

/// One eye-openness reading taken by the eye sampler.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EyeSample {
    pub ear: f64,
    pub timestamp: DateTime<Utc>,
}

/// Seconds elapsed from `earlier` to `later`, with microsecond resolution.
pub fn seconds_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    let delta = later - earlier;
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => delta.num_milliseconds() as f64 / 1000.0,
    }
}
