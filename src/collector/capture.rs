//! Background capture worker: a platform tap plus a pump thread that drains
//! the tap's channel into a collector.

use crate::collector::types::RawEvent;
use crate::collector::{InputTap, TapConfig};
use crossbeam_channel::RecvTimeoutError;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{info, warn};

/// Which input source a worker captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Keyboard,
    Mouse,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Keyboard => write!(f, "keyboard"),
            Source::Mouse => write!(f, "mouse"),
        }
    }
}

impl Source {
    fn tap_config(self) -> TapConfig {
        match self {
            Source::Keyboard => TapConfig::keyboard(),
            Source::Mouse => TapConfig::mouse(),
        }
    }

    /// Whether `event` came from this source.
    pub fn accepts(self, event: &RawEvent) -> bool {
        match self {
            Source::Keyboard => event.is_keyboard(),
            Source::Mouse => !event.is_keyboard(),
        }
    }
}

/// A running tap and its pump thread. Stops on drop.
pub struct CaptureWorker {
    source: Source,
    tap: InputTap,
    running: Arc<AtomicBool>,
    pump: Option<JoinHandle<()>>,
}

impl CaptureWorker {
    /// Start capturing `source`, handing each event to `sink`.
    ///
    /// Returns `None` when the tap cannot be started; the owning collector
    /// then stays idle and flushes zero-valued features.
    pub fn spawn<F>(source: Source, sink: F) -> Option<Self>
    where
        F: Fn(RawEvent) + Send + 'static,
    {
        let mut tap = InputTap::new(source.tap_config());
        if let Err(e) = tap.start() {
            warn!("{source} capture unavailable: {e}");
            return None;
        }

        let receiver = tap.receiver().clone();
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();

        let pump = thread::Builder::new()
            .name(format!("{source}-pump"))
            .spawn(move || {
                while flag.load(Ordering::SeqCst) {
                    match receiver.recv_timeout(Duration::from_millis(100)) {
                        Ok(event) if source.accepts(&event) => sink(event),
                        Ok(_) => continue,
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            });

        match pump {
            Ok(handle) => {
                info!("{source} capture started");
                Some(Self {
                    source,
                    tap,
                    running,
                    pump: Some(handle),
                })
            }
            Err(e) => {
                warn!("{source} pump thread failed to start: {e}");
                tap.stop();
                None
            }
        }
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.tap.stop();
        if let Some(handle) = self.pump.take() {
            let _ = handle.join();
            info!("{} capture stopped", self.source);
        }
    }
}

impl Drop for CaptureWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
