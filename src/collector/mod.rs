//! Signal collectors.
//!
//! Each collector is fed by its own background producer and drained by the
//! aggregator through [`SignalCollector::flush`]. Producer appends and
//! flushes go through the same mutex, so every event lands in exactly one
//! window.

pub mod capture;
pub mod eye;
pub mod keyboard;
pub mod mouse;
pub mod types;

#[cfg(target_os = "macos")]
pub mod macos;

#[cfg(target_os = "windows")]
pub mod windows;

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
pub mod noop;

use crate::core::features::FeatureWindow;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

pub use eye::{eye_aspect_ratio, EarStreamProvider, EyeCollector, LandmarkProvider};
pub use keyboard::KeyboardCollector;
pub use mouse::MouseCollector;
pub use types::{ClickEvent, EyeSample, KeyEvent, KeyKind, MoveEvent, RawEvent};

#[cfg(target_os = "macos")]
pub use macos::check_permission;
/// Platform input tap.
#[cfg(target_os = "macos")]
pub type InputTap = macos::MacOSTap;

#[cfg(target_os = "windows")]
pub use windows::check_permission;
/// Platform input tap.
#[cfg(target_os = "windows")]
pub type InputTap = windows::WindowsTap;

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
pub use noop::check_permission;
/// Platform input tap.
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
pub type InputTap = noop::NoopTap;

/// Common contract of the keyboard, mouse, and eye collectors.
pub trait SignalCollector: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Begin passive background capture. Idempotent; capture failures are
    /// logged and leave the collector idle.
    fn start(&self);

    /// Compute this collector's feature subset from the buffered window and
    /// clear the buffer, atomically with respect to the producer.
    fn flush(&self) -> FeatureWindow;

    /// Clear buffered state in place without computing features.
    fn reset(&self);
}

/// Which sources an input tap should capture.
#[derive(Debug, Clone)]
pub struct TapConfig {
    pub capture_keyboard: bool,
    pub capture_mouse: bool,
}

impl TapConfig {
    pub fn keyboard() -> Self {
        Self {
            capture_keyboard: true,
            capture_mouse: false,
        }
    }

    pub fn mouse() -> Self {
        Self {
            capture_keyboard: false,
            capture_mouse: true,
        }
    }
}

/// Errors from starting an input tap.
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("input tap is already running")]
    AlreadyRunning,
    #[error("input monitoring permission not granted")]
    PermissionDenied,
    #[error("failed to create event tap")]
    TapCreationFailed,
    #[error("failed to install input hook")]
    HookInstallationFailed,
    #[error("failed to spawn capture thread: {0}")]
    ThreadSpawn(String),
}

/// Lock collector state, recovering the data if a producer panicked while
/// holding the lock.
pub(crate) fn lock_state<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_tap_config_presets() {
        let keyboard = TapConfig::keyboard();
        assert!(keyboard.capture_keyboard && !keyboard.capture_mouse);
        let mouse = TapConfig::mouse();
        assert!(mouse.capture_mouse && !mouse.capture_keyboard);
    }

    #[test]
    fn test_lock_state_survives_poison() {
        let shared = Arc::new(Mutex::new(1));
        let poisoner = shared.clone();
        let _ = thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("producer panic");
        })
        .join();

        assert!(shared.is_poisoned());
        *lock_state(&shared) += 1;
        assert_eq!(*lock_state(&shared), 2);
    }
}
