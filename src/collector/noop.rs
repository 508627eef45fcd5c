//! Input tap for platforms without a system-wide hook implementation.
//!
//! Lets the crate build and run everywhere; collectors backed by this tap
//! simply flush zero-valued features.

use crate::collector::types::RawEvent;
use crate::collector::{CollectorError, TapConfig};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A tap that never emits events.
pub struct NoopTap {
    _config: TapConfig,
    _sender: Sender<RawEvent>,
    receiver: Receiver<RawEvent>,
    running: Arc<AtomicBool>,
}

impl NoopTap {
    pub fn new(config: TapConfig) -> Self {
        let (sender, receiver) = bounded(10_000);
        Self {
            _config: config,
            _sender: sender,
            receiver,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Mark the tap as running.
    pub fn start(&mut self) -> Result<(), CollectorError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(CollectorError::AlreadyRunning);
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn receiver(&self) -> &Receiver<RawEvent> {
        &self.receiver
    }
}

pub fn check_permission() -> bool {
    true
}
