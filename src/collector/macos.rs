//! macOS input tap using a Core Graphics event tap.
//!
//! Requires Input Monitoring permission. The tap is listen-only: events are
//! observed and passed through unchanged.

use crate::collector::types::RawEvent;
use crate::collector::{CollectorError, TapConfig};
use core_foundation::runloop::{kCFRunLoopCommonModes, CFRunLoop};
use core_graphics::event::{
    CGEvent, CGEventTap, CGEventTapLocation, CGEventTapOptions, CGEventTapPlacement, CGEventType,
    CallbackResult, EventField,
};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::error;

/// Event tap backed by a dedicated run-loop thread.
pub struct MacOSTap {
    config: TapConfig,
    sender: Sender<RawEvent>,
    receiver: Receiver<RawEvent>,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl MacOSTap {
    pub fn new(config: TapConfig) -> Self {
        let (sender, receiver) = bounded(10_000);

        Self {
            config,
            sender,
            receiver,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
        }
    }

    /// Start the run-loop thread.
    pub fn start(&mut self) -> Result<(), CollectorError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(CollectorError::AlreadyRunning);
        }
        if !check_permission() {
            return Err(CollectorError::PermissionDenied);
        }

        self.running.store(true, Ordering::SeqCst);

        let sender = self.sender.clone();
        let running = self.running.clone();
        let config = self.config.clone();

        let handle = thread::Builder::new()
            .name("cg-event-tap".to_string())
            .spawn(move || {
                if let Err(e) = run_event_loop(sender, running.clone(), config) {
                    error!("event tap loop failed: {e}");
                }
                running.store(false, Ordering::SeqCst);
            })
            .map_err(|e| CollectorError::ThreadSpawn(e.to_string()))?;

        self.thread_handle = Some(handle);
        Ok(())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn receiver(&self) -> &Receiver<RawEvent> {
        &self.receiver
    }
}

impl Drop for MacOSTap {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_event_types(config: &TapConfig) -> Vec<CGEventType> {
    let mut types = Vec::new();

    if config.capture_keyboard {
        types.push(CGEventType::KeyDown);
        types.push(CGEventType::KeyUp);
    }

    if config.capture_mouse {
        types.push(CGEventType::MouseMoved);
        types.push(CGEventType::LeftMouseDown);
        types.push(CGEventType::LeftMouseUp);
        types.push(CGEventType::RightMouseDown);
        types.push(CGEventType::RightMouseUp);
        types.push(CGEventType::LeftMouseDragged);
        types.push(CGEventType::RightMouseDragged);
    }

    types
}

fn run_event_loop(
    sender: Sender<RawEvent>,
    running: Arc<AtomicBool>,
    config: TapConfig,
) -> Result<(), CollectorError> {
    let event_types = build_event_types(&config);

    let tap = CGEventTap::new(
        CGEventTapLocation::Session,
        CGEventTapPlacement::HeadInsertEventTap,
        CGEventTapOptions::ListenOnly,
        event_types,
        move |_proxy, event_type, event: &CGEvent| {
            if let Some(raw) = convert_event(event_type, event) {
                // Never block the tap; drop the event if the pump is behind.
                let _ = sender.try_send(raw);
            }
            CallbackResult::Keep
        },
    )
    .map_err(|_| CollectorError::TapCreationFailed)?;

    let source = tap
        .mach_port()
        .create_runloop_source(0)
        .map_err(|_| CollectorError::TapCreationFailed)?;

    let run_loop = CFRunLoop::get_current();
    unsafe {
        run_loop.add_source(&source, kCFRunLoopCommonModes);
    }

    tap.enable();

    while running.load(Ordering::SeqCst) {
        CFRunLoop::run_in_mode(
            unsafe { kCFRunLoopCommonModes },
            std::time::Duration::from_millis(100),
            false,
        );
    }

    Ok(())
}

fn convert_event(event_type: CGEventType, event: &CGEvent) -> Option<RawEvent> {
    use core_graphics::event::CGEventType::*;

    match event_type {
        KeyDown => {
            // Auto-repeat would register as extra presses without releases.
            if event.get_integer_value_field(EventField::KEYBOARD_EVENT_AUTOREPEAT) != 0 {
                return None;
            }
            let code = event.get_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE);
            Some(RawEvent::key_down(code as u32))
        }
        KeyUp => {
            let code = event.get_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE);
            Some(RawEvent::key_up(code as u32))
        }
        MouseMoved | LeftMouseDragged | RightMouseDragged => {
            let location = event.location();
            Some(RawEvent::movement(location.x, location.y))
        }
        LeftMouseDown | RightMouseDown => Some(RawEvent::click(true)),
        LeftMouseUp | RightMouseUp => Some(RawEvent::click(false)),
        _ => None,
    }
}

/// Probe for Input Monitoring permission by creating a throwaway tap.
pub fn check_permission() -> bool {
    CGEventTap::new(
        CGEventTapLocation::Session,
        CGEventTapPlacement::HeadInsertEventTap,
        CGEventTapOptions::ListenOnly,
        vec![CGEventType::KeyDown],
        |_proxy, _type, _event| CallbackResult::Keep,
    )
    .is_ok()
}
